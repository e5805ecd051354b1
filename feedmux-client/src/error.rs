//! Error types for feedmux-client

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// Connection or transport failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The daemon answered with an error body
    #[error("API error {status} {code}: {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    /// An event payload could not be decoded
    #[error("Invalid event payload: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;
