//! URL shortener service and batch-delete pipeline.
//!
//! [`ShortenerService`] sits between a transport (HTTP, gRPC, the bundled
//! CLI) and a [`Repository`](shorturl_core::Repository). It generates keys,
//! retries on key collisions, and turns storage outcomes into the
//! conflict / not-found / gone distinctions a transport needs.
//! [`BatchDeleter`] tombstones many keys concurrently with the caller.

pub mod error;
pub mod pipeline;
pub mod service;

pub use error::{Result, ShortenerError};
pub use pipeline::{
    BatchDeleteHandle, BatchDeleteReport, BatchDeleter, DeleteOutcome, PipelineSettings,
};
pub use service::{
    BatchItem, BatchOutcome, BatchResult, ShortUrl, ShortenerService, ShortenerSettings, Stats,
    UserShortUrl,
};
