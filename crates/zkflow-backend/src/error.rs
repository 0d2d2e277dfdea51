use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
  /// The inputs can never succeed; retrying is pointless.
  #[error("invalid input: {0}")]
  InvalidInput(String),

  /// The backend is temporarily unable to serve the request.
  #[error("backend unavailable: {0}")]
  Unavailable(String),

  #[error("backend failure: {0}")]
  Failed(String),
}

impl BackendError {
  pub fn is_retryable(&self) -> bool {
    !matches!(self, BackendError::InvalidInput(_))
  }
}
