//! # Windvane Core Library
//!
//! Core functionality for the Windvane wind sensor daemon.
//!
//! This library provides:
//! - Serial line protocol for the Davis anemometer bridge (`wind: ...` frames)
//! - Conversion to calibrated speed and direction
//! - Interval aggregation with circular (vector) direction statistics
//! - A UDP listener for a Tempest reference station
//! - Continuous calibration against that reference
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use windvane_core::prelude::*;
//!
//! let config = WindvaneConfig::default();
//! let params = ParamsHandle::new(config.initial_params());
//! let queue = Arc::new(CalibrationQueue::new(config.queue_capacity));
//! let publisher: Arc<dyn Publisher> = Arc::new(TracingPublisher);
//!
//! let opener = SerialPortOpener::new(&config.serial.port, config.serial.baud_rate);
//! let acquisition = Acquisition::from_config(opener, &config, params.reader(), queue, publisher);
//! acquisition.run(CancellationToken::new()).await?;
//! ```

pub mod acquisition;
pub mod aggregate;
pub mod calibration;
pub mod circular;
pub mod config;
pub mod convert;
pub mod demo;
pub mod protocol;
pub mod publish;
pub mod reference;
pub mod units;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::acquisition::{Acquisition, AcquisitionOptions, AcquisitionStatsSnapshot};
    pub use crate::aggregate::{IntervalAggregator, IntervalReport, IntervalStats};
    pub use crate::calibration::{
        CalibrationEngine, CalibrationPhase, CalibrationQueue, EngineStatus, ParamsHandle,
        ParamsReader,
    };
    pub use crate::config::WindvaneConfig;
    pub use crate::convert::{convert, CalibrationParams, Reading};
    pub use crate::demo::DemoOpener;
    pub use crate::protocol::{parse, FrameSource, PortOpener, RawSample, SerialPortOpener};
    pub use crate::publish::{ChannelPublisher, Publisher, TelemetryRecord, TracingPublisher};
    pub use crate::reference::{ReferenceHandle, ReferenceListener, ReferenceSample, ReferenceSource};
    pub use tokio_util::sync::CancellationToken;
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
