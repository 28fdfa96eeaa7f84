//! Heartbeat Monitor
//!
//! While a channel is connected, probe the driver every interval with the
//! heartbeat timeout as an upper bound. Successes are reported with their
//! round-trip time; the first failure is reported once and ends the monitor.

use std::sync::Weak;
use std::time::Duration;

use agentwire_core::{ChannelError, ChannelResult, HeartbeatPolicy, TransportDriver};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::trace;

/// Probe `driver` once, bounded by `timeout`, and return the round-trip time
pub async fn probe_with_timeout(
    driver: &dyn TransportDriver,
    timeout: Duration,
) -> ChannelResult<Duration> {
    let started = Instant::now();
    match time::timeout(timeout, driver.probe()).await {
        Ok(Ok(())) => Ok(started.elapsed()),
        Ok(Err(err)) => Err(err.into()),
        Err(_) => Err(ChannelError::HeartbeatTimeout {
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

/// Receiver of heartbeat outcomes
pub(crate) trait HeartbeatTarget: Send + Sync + 'static {
    fn driver(&self) -> &dyn TransportDriver;

    fn heartbeat_succeeded(&self, rtt: Duration);

    /// Called at most once per monitor; the monitor stops afterwards
    fn heartbeat_failed(&self, error: ChannelError);
}

pub(crate) struct HeartbeatMonitor;

impl HeartbeatMonitor {
    /// Start monitoring `target`; the first probe fires one interval from now
    ///
    /// The monitor holds only a weak reference and exits once the target is
    /// gone.
    pub(crate) fn spawn<T: HeartbeatTarget>(target: Weak<T>, policy: &HeartbeatPolicy) -> JoinHandle<()> {
        let interval = policy.interval();
        let timeout = policy.timeout();
        tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(target) = target.upgrade() else {
                    break;
                };
                match probe_with_timeout(target.driver(), timeout).await {
                    Ok(rtt) => {
                        trace!(rtt_ms = rtt.as_millis() as u64, "Heartbeat ok");
                        target.heartbeat_succeeded(rtt);
                    }
                    Err(err) => {
                        target.heartbeat_failed(err);
                        break;
                    }
                }
            }
        })
    }
}
