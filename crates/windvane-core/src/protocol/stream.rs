//! Port opening seam
//!
//! The frame source never names a concrete transport. It asks a
//! [`PortOpener`] for a fresh byte stream on startup and after every
//! connection loss, which lets the daemon plug in the real serial port,
//! demo mode plug in a simulator, and tests plug in scripted readers.

use tokio::io::AsyncRead;
use tokio_serial::SerialPortBuilderExt;

use super::{OpenError, DEFAULT_BAUD_RATE};

/// Byte stream handed out by a [`PortOpener`]
pub type PortStream = Box<dyn AsyncRead + Send + Unpin>;

/// Something that can (re)open the sensor connection
pub trait PortOpener: Send + Sync {
    /// Open a new connection. Called once at startup and after every loss.
    fn open(&self) -> Result<PortStream, OpenError>;

    /// Human-readable description for logs
    fn describe(&self) -> String;
}

impl<O: PortOpener + ?Sized> PortOpener for Box<O> {
    fn open(&self) -> Result<PortStream, OpenError> {
        (**self).open()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Opens a physical serial port with tokio-serial (8N1, no flow control)
#[derive(Debug, Clone)]
pub struct SerialPortOpener {
    path: String,
    baud_rate: u32,
}

impl SerialPortOpener {
    /// Create an opener for `path` at `baud_rate`
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            path: path.into(),
            baud_rate: if baud_rate == 0 {
                DEFAULT_BAUD_RATE
            } else {
                baud_rate
            },
        }
    }
}

impl PortOpener for SerialPortOpener {
    fn open(&self) -> Result<PortStream, OpenError> {
        if !cfg!(windows) && !std::path::Path::new(&self.path).exists() {
            return Err(OpenError::NotFound(self.path.clone()));
        }

        let port = tokio_serial::new(&self.path, self.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()?;

        Ok(Box::new(port))
    }

    fn describe(&self) -> String {
        format!("{} @ {} baud", self.path, self.baud_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_device_is_not_found() {
        let opener = SerialPortOpener::new("/dev/windvane-does-not-exist", 115200);
        if cfg!(windows) {
            return;
        }
        assert!(matches!(opener.open(), Err(OpenError::NotFound(_))));
    }

    #[test]
    fn test_zero_baud_falls_back_to_default() {
        let opener = SerialPortOpener::new("/dev/ttyUSB0", 0);
        assert_eq!(opener.describe(), "/dev/ttyUSB0 @ 115200 baud");
    }
}
