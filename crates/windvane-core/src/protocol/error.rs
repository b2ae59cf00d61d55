//! Frame source and parser errors

use thiserror::Error;

/// Errors surfaced by the frame source
///
/// Only [`SourceError::DeviceNotFound`] ever reaches a caller of
/// [`FrameSource::next_line`](super::FrameSource::next_line); connection
/// losses are absorbed by the reconnect loop.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Serial device not found: {0}")]
    DeviceNotFound(String),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from opening a port through a [`PortOpener`](super::PortOpener)
#[derive(Error, Debug)]
pub enum OpenError {
    #[error("Port not found: {0}")]
    NotFound(String),

    #[error("Failed to open port: {0}")]
    Failed(String),
}

impl From<serialport::Error> for OpenError {
    fn from(e: serialport::Error) -> Self {
        match e.kind() {
            serialport::ErrorKind::NoDevice => OpenError::NotFound(e.to_string()),
            serialport::ErrorKind::Io(std::io::ErrorKind::NotFound) => {
                OpenError::NotFound(e.to_string())
            }
            _ => OpenError::Failed(e.to_string()),
        }
    }
}

/// Errors from parsing a single telemetry line
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Empty line")]
    Empty,

    #[error("Malformed line: {0:?}")]
    Malformed(String),

    #[error("Invalid {field} value: {value:?}")]
    InvalidField { field: &'static str, value: String },
}
