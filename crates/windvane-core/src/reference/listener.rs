//! UDP reference listener

use chrono::Utc;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::message::{classify, Decoded, ReferenceKind, ReferenceSample};
use super::{ReferenceError, ReferenceSource, DEFAULT_STALE_AFTER};
use crate::protocol::{Backoff, BackoffConfig};

/// Largest datagram the hub sends is well under this
const MAX_DATAGRAM: usize = 65535;

/// Datagram counters
#[derive(Debug, Default)]
pub struct ListenerStats {
    datagrams: AtomicU64,
    decoded: AtomicU64,
    ignored: AtomicU64,
    malformed: AtomicU64,
}

/// Point-in-time copy of [`ListenerStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ListenerStatsSnapshot {
    pub datagrams: u64,
    pub decoded: u64,
    pub ignored: u64,
    pub malformed: u64,
}

impl ListenerStats {
    pub fn snapshot(&self) -> ListenerStatsSnapshot {
        ListenerStatsSnapshot {
            datagrams: self.datagrams.load(Ordering::Relaxed),
            decoded: self.decoded.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Default)]
struct Latest {
    rapid_wind: Option<(ReferenceSample, Instant)>,
    obs_st: Option<(ReferenceSample, Instant)>,
}

/// Cloneable read side of the listener
///
/// Freshness is judged on the monotonic receive time, so neither the station
/// clock nor host clock steps can make a sample look younger than it is.
#[derive(Debug, Clone)]
pub struct ReferenceHandle {
    latest: Arc<Mutex<Latest>>,
    stats: Arc<ListenerStats>,
    stale_after: Duration,
    accept_obs_st: bool,
}

impl ReferenceHandle {
    /// Create a handle with no samples yet
    pub fn new(stale_after: Duration, accept_obs_st: bool) -> Self {
        Self {
            latest: Arc::new(Mutex::new(Latest::default())),
            stats: Arc::new(ListenerStats::default()),
            stale_after,
            accept_obs_st,
        }
    }

    /// Decode one datagram and remember it if it carries wind
    pub fn ingest(&self, datagram: &[u8]) -> Decoded {
        self.stats.datagrams.fetch_add(1, Ordering::Relaxed);
        let decoded = classify(datagram, Utc::now());
        match &decoded {
            Decoded::Wind(sample) => {
                self.stats.decoded.fetch_add(1, Ordering::Relaxed);
                trace!(
                    kind = ?sample.kind,
                    speed_knots = sample.speed_knots,
                    direction_deg = sample.direction_deg,
                    "reference wind"
                );
                let mut latest = self.lock();
                let slot = match sample.kind {
                    ReferenceKind::RapidWind => &mut latest.rapid_wind,
                    ReferenceKind::ObsSt => &mut latest.obs_st,
                };
                *slot = Some((*sample, Instant::now()));
            }
            Decoded::Ignored(kind) => {
                self.stats.ignored.fetch_add(1, Ordering::Relaxed);
                trace!("ignoring {} broadcast", kind);
            }
            Decoded::Malformed(reason) => {
                self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                debug!("malformed reference datagram: {}", reason);
            }
        }
        decoded
    }

    /// Datagram counters
    pub fn stats(&self) -> ListenerStatsSnapshot {
        self.stats.snapshot()
    }

    fn fresh(&self, entry: Option<(ReferenceSample, Instant)>) -> Option<ReferenceSample> {
        let (sample, at) = entry?;
        (at.elapsed() <= self.stale_after).then_some(sample)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Latest> {
        self.latest.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ReferenceHandle {
    fn default() -> Self {
        Self::new(DEFAULT_STALE_AFTER, false)
    }
}

impl ReferenceSource for ReferenceHandle {
    fn latest(&self) -> Option<ReferenceSample> {
        let latest = self.lock();
        self.fresh(latest.rapid_wind).or_else(|| {
            if self.accept_obs_st {
                self.fresh(latest.obs_st)
            } else {
                None
            }
        })
    }
}

/// Owns the UDP socket; run it on its own task
pub struct ReferenceListener {
    socket: UdpSocket,
    handle: ReferenceHandle,
}

impl ReferenceListener {
    /// Bind the broadcast port. Failing here is fatal to the caller.
    pub async fn bind(addr: SocketAddr, handle: ReferenceHandle) -> Result<Self, ReferenceError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| ReferenceError::Bind { addr, source })?;
        info!("Listening for reference broadcasts on UDP {}", addr);
        Ok(Self { socket, handle })
    }

    /// Address actually bound (useful with port 0)
    pub fn local_addr(&self) -> Result<SocketAddr, ReferenceError> {
        Ok(self.socket.local_addr()?)
    }

    /// Read side shared with the calibration engine
    pub fn handle(&self) -> ReferenceHandle {
        self.handle.clone()
    }

    /// Receive until cancelled; the socket is closed when this returns
    pub async fn run(self, cancel: CancellationToken) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let mut backoff = Backoff::new(BackoffConfig {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
            jitter: 0.2,
        });

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((len, _from)) => {
                        backoff.reset();
                        self.handle.ingest(&buf[..len]);
                    }
                    Err(e) => {
                        let delay = backoff.next_delay();
                        warn!("Reference socket error: {}; retrying in {:.1}s", e, delay.as_secs_f64());
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                },
            }
        }

        let stats = self.handle.stats();
        info!(
            datagrams = stats.datagrams,
            decoded = stats.decoded,
            ignored = stats.ignored,
            malformed = stats.malformed,
            "Reference listener stopped"
        );
    }
}
