//! Error types for the offline core.

/// Errors surfaced by cache and queue operations.
///
/// Storage failures are soft: the in-memory state already reflects the
/// change when one is returned, and the next successful write re-persists it.
#[derive(Debug, thiserror::Error)]
pub enum OfflineError {
  /// A cache TTL that is zero, negative, or not a finite number.
  #[error("invalid ttl: {0} hours (must be a positive number)")]
  InvalidTtl(f64),

  /// The durable store rejected a write.
  #[error("failed to persist {store}: {message}")]
  Storage { store: String, message: String },
}

impl OfflineError {
  pub(crate) fn storage(store: &str, err: impl std::fmt::Display) -> Self {
    Self::Storage {
      store: store.to_string(),
      message: err.to_string(),
    }
  }

  /// Whether the error only means "not persisted yet".
  pub fn is_soft(&self) -> bool {
    matches!(self, Self::Storage { .. })
  }
}

/// Result type for offline core operations.
pub type OfflineResult<T> = Result<T, OfflineError>;
