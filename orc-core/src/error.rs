use thiserror::Error;

/// Error taxonomy from the error-handling design: each kind carries its
/// own recovery policy at the call site (retry, skip-and-count,
/// mark-unsupported, or abort the pipeline).
#[derive(Debug, Error)]
pub enum OrcError {
    /// Sector read failure, locked file. Retried once by the caller with
    /// an increased timeout, then zero-filled if tolerant mode is set.
    #[error("transient I/O error reading {context}: {source}")]
    TransientIo {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Bad signature, bad fixup, run-list overflow, impossible attribute
    /// size. The current record/file is skipped; traversal continues.
    #[error("malformed structure in {context}: {reason}")]
    Malformed { context: String, reason: String },

    /// Encrypted attribute without a key, unknown reparse-point tag.
    /// Metadata is still collected; content is marked unsupported.
    #[error("unsupported: {reason}")]
    Unsupported { reason: String },

    /// Not actually an error: the rule's remaining matches yield
    /// metadata-only rows, but it is propagated through the same
    /// `Result` plumbing as real errors so call sites can match on it.
    #[error("quota exhausted for rule {rule_id}")]
    QuotaExhausted { rule_id: String },

    /// Invalid rule, missing yara source, unknown algorithm. Fatal at
    /// startup — the pipeline does not start.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Archive-codec failure, loss of the output device, cancellation.
    #[error("fatal: {0}")]
    Fatal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(String),

    #[error("{0}")]
    Other(String),
}

impl OrcError {
    pub fn malformed(context: impl Into<String>, reason: impl Into<String>) -> Self {
        OrcError::Malformed {
            context: context.into(),
            reason: reason.into(),
        }
    }

    pub fn unsupported(reason: impl Into<String>) -> Self {
        OrcError::Unsupported {
            reason: reason.into(),
        }
    }

    pub fn transient_io(context: impl Into<String>, source: std::io::Error) -> Self {
        OrcError::TransientIo {
            context: context.into(),
            source,
        }
    }

    /// Recoverable at record/file granularity (log, bump a counter, keep
    /// going) as opposed to fatal (the whole traversal must stop).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            OrcError::TransientIo { .. }
                | OrcError::Malformed { .. }
                | OrcError::Unsupported { .. }
                | OrcError::QuotaExhausted { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, OrcError>;
