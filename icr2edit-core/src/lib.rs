//! Parameter editing engine for the IndyCar Racing II executables.
//!
//! The engine identifies which executable build it was handed, binds a
//! parameter catalog to that build's offset table, decodes the fields into
//! editable values and writes edits back without touching anything else.

use std::path::PathBuf;
use thiserror::Error;

pub mod catalog;
pub mod codec;
pub mod image;
pub mod table;
pub mod transfer;
pub mod variant;

pub use catalog::{Catalog, CatalogSource, Category, ParameterDefinition, Selector};
pub use codec::{CodecError, FieldEncoding, FieldValue, Scale, Value, Width};
pub use image::{backup, backup_path, open, save, LoadedImage};
pub use table::{
    apply_edit, apply_value, changed_since, modified_rows, reset_to_default, snapshot,
    EditOutcome, ResetReport, Row,
};
pub use transfer::{export_values, import_values, ImportReport};
pub use variant::{Signature, Variant, VariantRegistry};

#[derive(Debug, Error)]
pub enum EditorError {
    #[error("unrecognized executable: {size} bytes does not match any known version")]
    UnrecognizedVariant { size: usize },

    #[error("parameter '{name}' has unsupported width {width} (expected 1, 2 or 4)")]
    UnsupportedWidth { name: String, width: u32 },

    #[error("duplicate definition for {category} #{index}: '{name}'")]
    DuplicateDefinition {
        category: Category,
        index: usize,
        name: String,
    },

    #[error("parameter '{name}' at {offset:#X} (+{width}) lies outside the {size}-byte {variant} image")]
    OffsetOutOfBounds {
        name: String,
        variant: String,
        offset: usize,
        width: usize,
        size: usize,
    },

    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("unknown parameter: {0}")]
    UnknownParameter(String),

    #[error("invalid value for '{parameter}': {reason}")]
    InvalidInput { parameter: String, reason: String },

    #[error("value {value} for '{parameter}' is out of range ({min} to {max})")]
    OutOfRange {
        parameter: String,
        value: String,
        min: i64,
        max: i64,
    },

    #[error("failed to {operation} {}", path.display())]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EditorError {
    /// Attach the parameter name to a codec failure.
    pub(crate) fn from_codec(parameter: &str, err: CodecError) -> Self {
        match err {
            CodecError::InvalidInput(reason) => EditorError::InvalidInput {
                parameter: parameter.to_string(),
                reason,
            },
            CodecError::OutOfRange { value, min, max } => EditorError::OutOfRange {
                parameter: parameter.to_string(),
                value,
                min,
                max,
            },
        }
    }

    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EditorError::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    /// Whether the session can carry on after this error. Catalog and
    /// version problems are fatal; bad selectors, bad values and failed
    /// saves are not.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EditorError::UnknownParameter(_)
                | EditorError::InvalidInput { .. }
                | EditorError::OutOfRange { .. }
                | EditorError::Io { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, EditorError>;
