pub mod board;
pub mod client;

pub use board::{BoardRow, HouseBoard};
pub use client::Client;
pub use client::RetryPolicy;
use thiserror::Error;
use wagerbook_types::{LedgerError, PlayerId};

/// Error type for client operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("failed: {0}")]
    Failed(reqwest::StatusCode),
    #[error("failed: {status}: {body}")]
    FailedWithBody {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),
    #[error("invalid URL scheme: {0} (expected http or https)")]
    InvalidScheme(String),
    #[error("not signed in")]
    NotSignedIn,
    #[error("no admin session")]
    NotAdmin,
    #[error("player {0} is not on the board")]
    UnknownPlayer(PlayerId),
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

impl Error {
    /// HTTP status returned by the server, if the request got that far.
    pub fn status(&self) -> Option<reqwest::StatusCode> {
        match self {
            Self::Failed(status) | Self::FailedWithBody { status, .. } => Some(*status),
            Self::Reqwest(err) => err.status(),
            _ => None,
        }
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;
