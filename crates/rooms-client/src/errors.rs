//! Client errors.

use thiserror::Error;

/// Failure to set up a client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The server URL did not parse.
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The URL scheme is not `ws` or `wss`.
    #[error("unsupported url scheme {0:?}")]
    UnsupportedScheme(String),
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, ClientError>;
