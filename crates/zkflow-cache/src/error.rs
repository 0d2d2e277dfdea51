use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
  #[error("cache unavailable: {message}")]
  Unavailable { message: String },

  #[error("cache backend error: {0}")]
  Backend(String),
}
