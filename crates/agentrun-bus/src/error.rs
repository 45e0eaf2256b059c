//! Bus errors.

use thiserror::Error;

/// Errors surfaced by bus operations.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("no subscriber at address: {0}")]
    UnknownTarget(String),

    #[error("request to {0} timed out")]
    Timeout(String),

    #[error("channel to {0} is closed")]
    ChannelClosed(String),
}
