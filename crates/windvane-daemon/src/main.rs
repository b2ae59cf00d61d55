//! Windvane daemon
//!
//! Reads the Davis anemometer, publishes interval reports as JSON lines on
//! stdout and, when enabled, keeps the calibration in step with a Tempest
//! reference station. Logs go to stderr.
//!
//! ```bash
//! windvane --port /dev/ttyUSB0 --continuous
//! windvane --demo --interval 10
//! windvane --list-ports
//! ```

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cli::Cli;
use windvane_core::acquisition::Acquisition;
use windvane_core::calibration::{CalibrationEngine, CalibrationQueue, ParamsHandle};
use windvane_core::config::WindvaneConfig;
use windvane_core::demo::DemoOpener;
use windvane_core::protocol::{list_ports, PortOpener, SerialPortOpener};
use windvane_core::publish::{ChannelPublisher, Publisher, TelemetryRecord};
use windvane_core::reference::{ReferenceHandle, ReferenceListener};

/// Records buffered between the pipeline and stdout
const PUBLISH_BUFFER: usize = 1024;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug, cli.log_json);

    if cli.list_ports {
        let ports = list_ports();
        if ports.is_empty() {
            println!("No serial ports found");
        }
        for port in ports {
            println!("{}", port);
        }
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => WindvaneConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => WindvaneConfig::default(),
    };
    cli.apply(&mut config);
    config.validate().context("invalid configuration")?;

    let opener: Box<dyn PortOpener> = if cli.demo {
        info!("Demo mode: using simulated sensor");
        Box::new(DemoOpener::default())
    } else {
        Box::new(SerialPortOpener::new(
            config.serial.port.clone(),
            config.serial.baud_rate,
        ))
    };

    run(config, opener).await
}

fn init_tracing(debug: bool, json: bool) {
    let default = if debug {
        "windvane=debug,windvane_core=debug"
    } else {
        "windvane=info,windvane_core=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(config: WindvaneConfig, opener: Box<dyn PortOpener>) -> Result<()> {
    let cancel = CancellationToken::new();

    let (channel, records) = ChannelPublisher::new(PUBLISH_BUFFER);
    let publisher_stats = channel.stats();
    let publisher: Arc<dyn Publisher> = Arc::new(channel);
    let printer = tokio::spawn(print_records(records));

    let params = ParamsHandle::new(config.initial_params());
    let queue = Arc::new(CalibrationQueue::new(config.queue_capacity));
    info!(
        speed_factor = config.calibration.speed_factor,
        direction_offset = config.calibration.direction_offset,
        direction_scale = config.calibration.direction_scale,
        interval_secs = config.reporting.interval_secs,
        "Starting windvane {}",
        windvane_core::VERSION
    );

    let mut tasks: Vec<JoinHandle<()>> = Vec::new();
    if config.continuous.enabled {
        let handle = ReferenceHandle::new(
            config.reference.stale_after(),
            config.reference.accept_obs_st,
        );
        let listener = ReferenceListener::bind(config.reference.bind_addr, handle)
            .await
            .context("binding reference listener")?;
        let reference = listener.handle();
        tasks.push(tokio::spawn(listener.run(cancel.clone())));

        let engine = CalibrationEngine::new(
            config.continuous.clone(),
            params.clone(),
            Arc::clone(&queue),
            reference,
        )
        .with_publisher(Arc::clone(&publisher));
        tasks.push(tokio::spawn(engine.run(cancel.clone())));
    } else {
        info!("Continuous calibration disabled");
    }

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested"),
            Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
        }
        shutdown.cancel();
    });

    let acquisition = Acquisition::from_config(
        opener,
        &config,
        params.reader(),
        Arc::clone(&queue),
        Arc::clone(&publisher),
    );
    let result = acquisition.run(cancel.clone()).await;

    // Stop the engine and listener whether acquisition ended cleanly or not
    cancel.cancel();
    for task in tasks {
        if let Err(e) = task.await {
            warn!("Background task failed: {}", e);
        }
    }
    drop(publisher);
    if tokio::time::timeout(Duration::from_secs(5), printer).await.is_err() {
        warn!("Timed out flushing published records");
    }

    info!(
        published = publisher_stats.published(),
        dropped = publisher_stats.dropped(),
        "Windvane stopped"
    );
    result
        .map(|_| ())
        .context("serial device unavailable at startup")
}

async fn print_records(mut records: mpsc::Receiver<TelemetryRecord>) {
    while let Some(record) = records.recv().await {
        match serde_json::to_string(&record) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!("Failed to encode {}: {}", record.topic, e),
        }
    }
}
