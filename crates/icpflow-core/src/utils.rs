/*!
 * Async helpers shared by the icpflow crates.
 */
use std::future::Future;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Run a future with a timeout
///
/// # Arguments
///
/// * `duration` - The timeout duration
/// * `what` - Name of the operation, used in the timeout error
/// * `future` - The future to run
///
/// # Returns
///
/// The result of the future, or a timeout error if the timeout is reached
pub async fn with_timeout<F, T>(duration: Duration, what: &str, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(Error::timeout(format!("{} did not finish within {:?}", what, duration))),
    }
}

/// Run a future under an optional timeout; `None` waits indefinitely
pub async fn with_optional_timeout<F, T>(duration: Option<Duration>, what: &str, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match duration {
        Some(duration) => with_timeout(duration, what, future).await,
        None => future.await,
    }
}

/// Create a task that runs in the background and logs any errors
///
/// # Arguments
///
/// * `name` - A name for the task (for logging)
/// * `fut` - The future to run
pub fn spawn_and_log<F, T, E>(name: &str, fut: F) -> tokio::task::JoinHandle<()>
where
    F: Future<Output = std::result::Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let task_name = name.to_string();
    tokio::spawn(async move {
        match fut.await {
            Ok(_) => {
                debug!("Task '{}' completed successfully", task_name);
            }
            Err(e) => {
                warn!("Task '{}' failed: {}", task_name, e);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_with_timeout_success() {
        let result = with_timeout(Duration::from_secs(1), "answer", async { Ok::<_, Error>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_failure() {
        let result = with_timeout(Duration::from_millis(10), "GetAnalysisStatus", async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok::<_, Error>(42)
        })
        .await;
        match result {
            Err(Error::Timeout(msg)) => assert!(msg.contains("GetAnalysisStatus")),
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_optional_timeout_none_waits() {
        let result = with_optional_timeout(None, "slow", async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok::<_, Error>("done")
        })
        .await;
        assert_eq!(result.unwrap(), "done");
    }

    #[test_log::test(tokio::test)]
    async fn test_spawn_and_log_runs_future() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        spawn_and_log("flag", async move {
            flag.store(true, Ordering::SeqCst);
            Err::<(), _>("logged, not propagated")
        })
        .await
        .unwrap();
        assert!(ran.load(Ordering::SeqCst));
    }
}
