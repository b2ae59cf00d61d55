//! Reference listener errors

use std::net::SocketAddr;
use thiserror::Error;

/// Errors from the reference listener
///
/// Only binding can fail; once bound, receive errors are retried forever.
#[derive(Error, Debug)]
pub enum ReferenceError {
    #[error("Failed to bind reference socket on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
