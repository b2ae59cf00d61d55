//! Reference Station
//!
//! Receives the Tempest station's UDP broadcasts and keeps the freshest wind
//! observation for the calibration engine.

mod error;
mod listener;
pub mod message;

pub use error::ReferenceError;
pub use listener::{ListenerStats, ListenerStatsSnapshot, ReferenceHandle, ReferenceListener};
pub use message::{classify, decode, Decoded, ReferenceKind, ReferenceSample};

/// UDP port the station hub broadcasts on
pub const DEFAULT_UDP_PORT: u16 = 50222;

/// Age after which a reference sample is unusable
pub const DEFAULT_STALE_AFTER: std::time::Duration = std::time::Duration::from_secs(30);

/// Something that can supply the current reference wind
///
/// `None` means "not usable right now": never received, or stale.
pub trait ReferenceSource: Send + Sync {
    fn latest(&self) -> Option<ReferenceSample>;
}
