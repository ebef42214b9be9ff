use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing ingestion and query activity.
#[derive(Default)]
pub struct ServiceMetrics {
    documents_ingested: AtomicU64,
    chunks_indexed: AtomicU64,
    queries_served: AtomicU64,
    last_ingest_seconds: AtomicU64,
}

impl ServiceMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an ingested book, the number of chunks produced for it and how long it took.
    pub fn record_ingestion(&self, chunk_count: u64, duration_seconds: u64) {
        self.documents_ingested.fetch_add(1, Ordering::Relaxed);
        self.chunks_indexed.fetch_add(chunk_count, Ordering::Relaxed);
        self.last_ingest_seconds
            .store(duration_seconds, Ordering::Relaxed);
    }

    /// Record an answered RAG query.
    pub fn record_query(&self) {
        self.queries_served.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let documents_ingested = self.documents_ingested.load(Ordering::Relaxed);
        MetricsSnapshot {
            documents_ingested,
            chunks_indexed: self.chunks_indexed.load(Ordering::Relaxed),
            queries_served: self.queries_served.load(Ordering::Relaxed),
            last_ingest_seconds: (documents_ingested > 0)
                .then(|| self.last_ingest_seconds.load(Ordering::Relaxed)),
        }
    }
}

/// Immutable view of service counters used for reporting.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Number of books ingested since startup.
    pub documents_ingested: u64,
    /// Total chunk count indexed across all ingestions.
    pub chunks_indexed: u64,
    /// Number of RAG queries answered since startup.
    pub queries_served: u64,
    /// Wall-clock duration of the most recent ingestion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_ingest_seconds: Option<u64>,
}
