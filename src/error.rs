use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Serial channel lock could not be obtained in time
    #[error("modem channel busy")]
    ChannelBusy,

    /// Modem did not answer within the transaction budget
    #[error("modem response timeout")]
    Timeout,

    /// Modem answered, but not what we expected
    #[error("unexpected modem response: {0:?}")]
    NoMatch(String),

    /// One malformed record in a listing
    #[error("skipped listing record: {0}")]
    ParseSkip(String),

    /// Address we refuse to put on the command line
    #[error("invalid recipient: {0:?}")]
    InvalidRecipient(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("blocking task failure: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
