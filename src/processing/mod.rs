//! Document processing pipeline: download, parsing, chunking, embedding and storage.

mod cache;
mod chunking;
mod mappers;
mod service;
pub mod types;

pub use service::{ProcessingApi, ProcessingService};
pub use types::{
    BookRemoval, BookStructureView, ChunkingError, IngestRequest, IngestResponse, ProcessingError,
};
