/*!
 * Analysis completion wait.
 *
 * After an analysis starts, the status is re-queried on a fixed interval
 * until the cached analysis status is neither Running nor Paused. The first
 * check follows the first interval, since replies arrive asynchronously and
 * the cache may still hold the status from before the command. Callbacks
 * observed on the analysis watch wake the loop early; they never trigger an
 * extra query.
 */
use std::time::Duration;

use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use icpflow_core::config::AnalysisConfig;
use icpflow_core::error::{Error, Result};
use icpflow_instrument::{AnalysisStatus, InstrumentSession};

/// How a completion wait polls and when it gives up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitSettings {
    /// Interval between status queries
    pub poll_interval: Duration,
    /// Overall bound, `None` to wait indefinitely
    pub timeout: Option<Duration>,
}

impl From<&AnalysisConfig> for WaitSettings {
    fn from(config: &AnalysisConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            timeout: config.wait_timeout(),
        }
    }
}

impl Default for WaitSettings {
    fn default() -> Self {
        WaitSettings::from(&AnalysisConfig::default())
    }
}

fn in_progress(status: Option<AnalysisStatus>) -> bool {
    status.map_or(false, |s| s.is_active())
}

/// Wait until the session's analysis is no longer running or paused
///
/// The cached status is only trusted once a reading has arrived after the
/// wait began, either from a poll query or from a callback. Returns the final
/// cached status. Fails with [`Error::Cancelled`] when `cancel` is tripped and
/// with [`Error::Timeout`] when the bound elapses.
pub async fn wait_for_completion(
    session: &InstrumentSession,
    settings: &WaitSettings,
    cancel: &CancellationToken,
) -> Result<Option<AnalysisStatus>> {
    let started = Instant::now();
    let deadline = settings.timeout.map(|timeout| started + timeout);
    let mut changes = session.watch_analysis();
    drop(changes.borrow_and_update());
    let mut watching = true;
    let mut fresh = false;
    let mut next_poll = started + settings.poll_interval;
    let mut polls = 0u32;

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                info!(polls, "completion wait cancelled");
                return Err(Error::cancelled("analysis wait interrupted"));
            }
            _ = async { sleep_until(deadline.unwrap_or(next_poll)).await }, if deadline.is_some() => {
                return Err(Error::timeout(format!(
                    "analysis still {:?} after {:?}",
                    session.analysis_status(),
                    started.elapsed()
                )));
            }
            changed = changes.changed(), if watching => {
                match changed {
                    Ok(()) => fresh = true,
                    Err(_) => watching = false,
                }
            }
            _ = sleep_until(next_poll) => {
                polls += 1;
                debug!(polls, "querying analysis status");
                session.query_analysis_status().await?;
                next_poll = Instant::now() + settings.poll_interval;
                // Replies delivered during the query count as fresh; later ones wake the watch arm.
                if !watching || changes.has_changed().unwrap_or(true) {
                    fresh = true;
                    drop(changes.borrow_and_update());
                }
            }
        }

        let status = session.analysis_status();
        if fresh && !in_progress(status) {
            info!(polls, elapsed = ?started.elapsed(), "analysis finished: {:?}", status);
            return Ok(status);
        }
    }
}
