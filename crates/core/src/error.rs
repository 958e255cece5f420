//! Error types for the serializer core.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SerializerError>;

#[derive(Debug, Error)]
pub enum SerializerError {
    /// A record is missing a required field or has a broken structure.
    /// `index` is the record's position in its split when known.
    #[error("malformed record{}: {reason}", .index.map(|i| format!(" #{i}")).unwrap_or_default())]
    MalformedRecord { index: Option<usize>, reason: String },

    /// A post-assembly length or budget check failed.
    #[error("length invariant violated: {0}")]
    LengthInvariant(String),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("template error: {0}")]
    Template(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

impl SerializerError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedRecord {
            index: None,
            reason: reason.into(),
        }
    }

    /// Attach the record position to a `MalformedRecord` error; other kinds pass through.
    pub fn at_record(self, record_index: usize) -> Self {
        match self {
            Self::MalformedRecord { index: None, reason } => Self::MalformedRecord {
                index: Some(record_index),
                reason,
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_message_includes_index() {
        let err = SerializerError::malformed("missing field `output`").at_record(7);
        assert_eq!(
            err.to_string(),
            "malformed record #7: missing field `output`"
        );
    }

    #[test]
    fn test_at_record_keeps_other_kinds() {
        let err = SerializerError::LengthInvariant("x".to_string()).at_record(3);
        assert!(matches!(err, SerializerError::LengthInvariant(_)));
    }
}
