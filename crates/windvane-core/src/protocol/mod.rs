//! Davis Serial Protocol
//!
//! Reads the Arduino bridge's newline-delimited ASCII telemetry:
//! port discovery, the reconnecting line source and the line parser.

mod codec;
mod error;
pub mod parser;
pub mod serial;
mod source;
mod stream;

pub use codec::FrameCodec;
pub use error::{OpenError, ParseError, SourceError};
pub use parser::{parse, parse_at, RawSample};
pub use serial::{list_ports, PortInfo};
pub use source::{Backoff, BackoffConfig, ConnectionObserver, ConnectionState, FrameSource};
pub use stream::{PortOpener, PortStream, SerialPortOpener};

/// Default baud rate of the Arduino bridge
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Default serial device
pub const DEFAULT_PORT: &str = "/dev/ttyUSB0";

/// Longest accepted line in bytes; a valid frame is well under 64
pub const DEFAULT_MAX_LINE_LEN: usize = 256;
