use thiserror::Error;

/// Primary error type for Kelpie operations.
///
/// One enum for the whole workspace: the engine layer, the key codec, and
/// the index adapter all signal through it, so callers match on a single
/// type. Structured variants carry the fields a caller or an operator needs
/// to act on the failure.
#[derive(Error, Debug)]
pub enum KelpieError {
    // === Validation errors ===
    /// Key exceeds the maximum encoded size accepted by the index.
    #[error("key too large to index: {size} bytes (max {max}): {key_text}")]
    KeyTooLong {
        size: usize,
        max: usize,
        key_text: String,
    },

    /// Unique-index constraint violation.
    #[error("E11000 duplicate key error collection: {namespace} index: {index_name} dup key: {key_text}")]
    DuplicateKey {
        namespace: String,
        index_name: String,
        key_text: String,
    },

    // === Configuration errors ===
    /// Unrecognized field in the index's storage-engine options.
    #[error("'{option}' is not a supported option")]
    InvalidOptions { option: String },

    /// Malformed engine configuration string.
    #[error("invalid engine configuration: {detail}")]
    InvalidConfig { detail: String },

    // === Format errors ===
    /// Table metadata carries a format version this build cannot use.
    ///
    /// Unrecoverable without repair; the caller owns process termination.
    #[error("unsupported index format version {found} (supported: {min}..={max}); repair required")]
    UnsupportedIndexFormat { found: i64, min: i64, max: i64 },

    /// Table metadata is missing or unreadable.
    #[error("index metadata unavailable for '{uri}': {detail}")]
    MetadataUnavailable { uri: String, detail: String },

    // === Key codec errors ===
    /// Encoded key bytes that do not decode back to a structured key.
    #[error("invalid index key encoding: {detail}")]
    InvalidKey { detail: String },

    // === Engine-layer signaling ===
    /// No entry at the probed key.
    #[error("no matching entry found")]
    NotFound,

    /// Raw duplicate-key response from the engine's insert path.
    ///
    /// Distinct from [`KelpieError::DuplicateKey`]: this is the engine
    /// telling the adapter a row already exists at the exact engine key,
    /// which the adapter usually absorbs (idempotent insert, duplicate-list
    /// maintenance) rather than surfacing.
    #[error("engine row already exists at key")]
    KeyExists,

    /// Another transaction touched the same row; the caller's retry loop
    /// owns recovery.
    #[error("write conflict on table '{uri}'")]
    WriteConflict { uri: String },

    /// Resource is busy (e.g. bulk open while cursors are live).
    #[error("table '{uri}' is busy")]
    Busy { uri: String },

    /// Structural table damage reported by the engine's verifier.
    #[error("table verification failed for '{uri}': {detail}")]
    TableDamaged { uri: String, detail: String },

    // === Internal errors ===
    /// Internal logic error (should never happen).
    #[error("internal error: {0}")]
    Internal(String),
}

impl KelpieError {
    /// Build an [`KelpieError::Internal`] from any displayable detail.
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::Internal(detail.into())
    }

    /// Whether this error is transient and worth a caller-level retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::WriteConflict { .. } | Self::Busy { .. }
        )
    }

    /// Whether this error means "the probed entry is absent".
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

/// Convenience alias used across the workspace.
pub type Result<T> = std::result::Result<T, KelpieError>;
