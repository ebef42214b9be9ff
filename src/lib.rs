#![deny(missing_docs)]

//! Core library for the textbook RAG service: PDF ingestion, vector retrieval and lesson
//! outline generation over a catalogue of grades, books, chapters and lessons.

/// HTTP routing and REST handlers.
pub mod api;
/// Relational catalogue of grades, subjects, books, sections and chunks.
pub mod catalog;
/// Environment-driven configuration management.
pub mod config;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Chat completion client used to draft outlines.
pub mod generation;
/// Structured logging and tracing setup.
pub mod logging;
/// Ingestion and query counters.
pub mod metrics;
/// PDF text extraction, OCR fallback and structure detection.
pub mod parser;
/// Document processing pipeline.
pub mod processing;
/// Qdrant vector store integration.
pub mod qdrant;
/// Query construction, prompting and response assembly for lesson outlines.
pub mod rag;
/// Slide skeletons built from outlines.
pub mod slides;
