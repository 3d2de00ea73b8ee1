// ⚠️ Error taxonomy for the import pipeline
// File-level failures are all-or-nothing: any of these means nothing was written.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Minimum concept a spreadsheet must carry before any row is looked at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequiredConcept {
    AccountName,
    AdNameOrDay,
    AdName,
}

impl fmt::Display for RequiredConcept {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RequiredConcept::AccountName => "account name",
            RequiredConcept::AdNameOrDay => "ad name or day",
            RequiredConcept::AdName => "ad name",
        };
        f.write_str(label)
    }
}

/// Problems with the static bilingual header dictionary
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DictionaryError {
    #[error("header dictionary entry for {field} contains an empty variant")]
    EmptyVariant { field: String },

    #[error("header \"{header}\" is claimed by both {first} and {second}")]
    AmbiguousHeader {
        header: String,
        first: String,
        second: String,
    },
}

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("required column missing: {missing}")]
    SchemaValidation { missing: RequiredConcept },

    #[error("file {file_hash} was already imported for client {client_id}")]
    DuplicateFile { client_id: String, file_hash: String },

    #[error("could not read file: {0}")]
    UnreadableFile(String),

    #[error("unknown client: {0}")]
    UnknownClient(String),

    #[error("import batch not found: {0}")]
    BatchNotFound(String),

    #[error("invalid header dictionary: {0}")]
    Dictionary(#[from] DictionaryError),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ImportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_error_names_concept() {
        let err = ImportError::SchemaValidation {
            missing: RequiredConcept::AdNameOrDay,
        };
        assert_eq!(err.to_string(), "required column missing: ad name or day");
    }

    #[test]
    fn test_storage_error_wraps_anyhow() {
        let err: ImportError = anyhow::anyhow!("disk full").into();
        assert!(matches!(err, ImportError::Storage(_)));
        assert!(err.to_string().contains("disk full"));
    }
}
