//! Reconnecting frame source
//!
//! Owns the one and only sensor connection. Yields raw text lines forever:
//! read errors and end-of-stream close the connection, wait out a jittered
//! exponential backoff, and reopen without the caller noticing. The only
//! error a caller ever sees is [`SourceError::DeviceNotFound`] on the very
//! first open attempt.
//!
//! All reconnect state lives in the struct, so [`FrameSource::next_line`] is
//! cancel-safe and can sit in a `tokio::select!` next to a timer.

use futures::StreamExt;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, warn};

use super::{FrameCodec, OpenError, PortOpener, PortStream, SourceError};

/// Connection state reported to the observer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Not connected
    Disconnected,
    /// Connected and reading
    Connected,
    /// Open attempt failed, waiting to retry
    Error,
}

/// Callback invoked on every connection state change
pub type ConnectionObserver = Box<dyn Fn(ConnectionState) + Send + Sync>;

/// Reconnect timing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    /// First retry delay
    pub initial: Duration,
    /// Upper bound for the doubling delay
    pub max: Duration,
    /// Fractional jitter applied to each delay (0.2 = ±20%)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(5),
            max: Duration::from_secs(60),
            jitter: 0.2,
        }
    }
}

/// Bounded exponential backoff with jitter
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    current: Duration,
}

impl Backoff {
    /// Create a backoff starting at `config.initial`
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            current: config.initial,
        }
    }

    /// Delay before the next attempt; doubles the base for the one after
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.current = (self.current * 2).min(self.config.max.max(self.config.initial));

        let jitter = self.config.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return base;
        }
        let scale = 1.0 + rand::thread_rng().gen_range(-jitter..=jitter);
        base.mul_f64(scale)
    }

    /// Return to the initial delay after a healthy read
    pub fn reset(&mut self) {
        self.current = self.config.initial;
    }
}

/// Lazy, reconnecting line reader over a [`PortOpener`]
pub struct FrameSource<O: PortOpener> {
    opener: O,
    reader: Option<FramedRead<PortStream, FrameCodec>>,
    max_line_len: usize,
    backoff: Backoff,
    retry_at: Option<Instant>,
    open_attempts: u64,
    /// Overlong lines dropped and not yet collected by [`Self::take_discarded`]
    discarded: u64,
    /// Drop count already read from the current codec
    codec_discarded: u64,
    observer: Option<ConnectionObserver>,
}

impl<O: PortOpener> FrameSource<O> {
    /// Create a source; nothing is opened until the first [`Self::next_line`]
    pub fn new(opener: O, backoff: BackoffConfig, max_line_len: usize) -> Self {
        Self {
            opener,
            reader: None,
            max_line_len,
            backoff: Backoff::new(backoff),
            retry_at: None,
            open_attempts: 0,
            discarded: 0,
            codec_discarded: 0,
            observer: None,
        }
    }

    /// Install a connection state observer
    pub fn with_observer(mut self, observer: ConnectionObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Open the connection now instead of on first read
    ///
    /// Surfaces `DeviceNotFound` at startup; any other failure schedules a retry.
    pub fn connect(&mut self) -> Result<(), SourceError> {
        if self.reader.is_some() {
            return Ok(());
        }
        self.open_attempts += 1;
        match self.opener.open() {
            Ok(stream) => {
                info!("Connected to {}", self.opener.describe());
                self.reader = Some(FramedRead::new(stream, FrameCodec::new(self.max_line_len)));
                self.codec_discarded = 0;
                self.retry_at = None;
                self.notify(ConnectionState::Connected);
                Ok(())
            }
            Err(OpenError::NotFound(path)) if self.open_attempts == 1 => {
                Err(SourceError::DeviceNotFound(path))
            }
            Err(e) => {
                let delay = self.backoff.next_delay();
                warn!(
                    "Failed to open {}: {}; retrying in {:.1}s",
                    self.opener.describe(),
                    e,
                    delay.as_secs_f64()
                );
                self.retry_at = Some(Instant::now() + delay);
                self.notify(ConnectionState::Error);
                Ok(())
            }
        }
    }

    /// Wait for the next non-empty line, reconnecting as needed
    pub async fn next_line(&mut self) -> Result<String, SourceError> {
        loop {
            let Some(reader) = self.reader.as_mut() else {
                if let Some(at) = self.retry_at {
                    tokio::time::sleep_until(at).await;
                }
                self.connect()?;
                continue;
            };

            let item = reader.next().await;
            self.collect_discarded();
            match item {
                Some(Ok(line)) => {
                    self.backoff.reset();
                    if line.trim().is_empty() {
                        continue;
                    }
                    debug!(line = %line.trim_end(), "raw serial data");
                    return Ok(line);
                }
                Some(Err(e)) => self.drop_connection(&SourceError::ConnectionLost(e.to_string())),
                None => self.drop_connection(&SourceError::ConnectionLost(
                    "end of stream".to_string(),
                )),
            }
        }
    }

    /// Overlong lines the codec dropped since the last call
    pub fn take_discarded(&mut self) -> u64 {
        std::mem::take(&mut self.discarded)
    }

    fn collect_discarded(&mut self) {
        if let Some(reader) = &self.reader {
            let total = reader.decoder().overlong_count();
            self.discarded += total.saturating_sub(self.codec_discarded);
            self.codec_discarded = total;
        }
    }

    /// Close the connection; the next read reopens it
    fn drop_connection(&mut self, reason: &SourceError) {
        self.reader = None;
        let delay = self.backoff.next_delay();
        warn!(
            "{} on {}; reconnecting in {:.1}s",
            reason,
            self.opener.describe(),
            delay.as_secs_f64()
        );
        self.retry_at = Some(Instant::now() + delay);
        self.notify(ConnectionState::Disconnected);
    }

    fn notify(&self, state: ConnectionState) {
        if let Some(observer) = &self.observer {
            observer(state);
        }
    }
}
