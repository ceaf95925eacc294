//! Benchmark ingest: QALD parsing, entity extraction and gold-query validation.

pub mod entities;
pub mod qald;
pub mod validate;

use thiserror::Error;

pub use entities::{import_dataset, EntityExtractor, ImportOptions};
pub use qald::{ExpectedAnswer, QaldDataset, QaldQuestion};
pub use validate::{validate_dataset, RemovedEntry, ValidationReport};

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Not a QALD dataset: {0}")]
    Format(String),

    #[error("Duplicate question id {0}")]
    DuplicateId(String),
}
