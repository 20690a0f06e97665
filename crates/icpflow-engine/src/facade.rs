/*!
 * The action façade.
 *
 * Maps each catalog action onto session commands. Analysis actions may wait
 * for completion; the token of the wait in flight is kept so a concurrent
 * cancel, pause or safety stop can end it.
 */
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Instrument};

use icpflow_core::config::AnalysisConfig;
use icpflow_core::error::Result;
use icpflow_core::logging::operation_span;
use icpflow_instrument::{AnalysisStatus, Command, InstrumentSession};

use crate::request::{ActionRequest, AutoAnalysisRequest, ManualAnalysisRequest};
use crate::wait::{wait_for_completion, WaitSettings};

/// Successful result of one action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOutcome {
    /// Catalog name of the action
    pub action: String,
    /// Raw vendor response to the action's command
    pub response: String,
    /// Analysis status when the action returned, for analysis actions
    pub analysis_status: Option<AnalysisStatus>,
}

impl ActionOutcome {
    fn new(action: &str, response: String) -> Self {
        Self {
            action: action.to_string(),
            response,
            analysis_status: None,
        }
    }
}

/// Which admin request interrupted the instrument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interrupt {
    /// Stop the analysis and rewind the sequence
    Cancel,
    /// Stop the analysis
    Pause,
    /// Stop the analysis
    SafetyStop,
}

impl Interrupt {
    /// Admin name of the interrupt
    pub fn name(&self) -> &'static str {
        match self {
            Interrupt::Cancel => "cancel",
            Interrupt::Pause => "pause",
            Interrupt::SafetyStop => "safety_stop",
        }
    }
}

impl fmt::Display for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

struct ActiveWait {
    id: u64,
    token: CancellationToken,
}

/// Removes the wait registration when the analysis action returns
struct WaitRegistration<'a> {
    facade: &'a ActionFacade,
    id: u64,
    token: CancellationToken,
}

impl Drop for WaitRegistration<'_> {
    fn drop(&mut self) {
        let mut slot = self.facade.lock_wait();
        if slot.as_ref().map_or(false, |active| active.id == self.id) {
            *slot = None;
        }
    }
}

/// Remote-callable actions over one instrument session
pub struct ActionFacade {
    session: Arc<InstrumentSession>,
    analysis: AnalysisConfig,
    wait: Mutex<Option<ActiveWait>>,
    next_wait_id: AtomicU64,
}

impl fmt::Debug for ActionFacade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionFacade")
            .field("session", &self.session)
            .field("analysis", &self.analysis)
            .field("waiting", &self.is_waiting())
            .finish()
    }
}

impl ActionFacade {
    /// Create a façade over a connected session
    pub fn new(session: Arc<InstrumentSession>, analysis: AnalysisConfig) -> Self {
        Self {
            session,
            analysis,
            wait: Mutex::new(None),
            next_wait_id: AtomicU64::new(0),
        }
    }

    /// The underlying session
    pub fn session(&self) -> &Arc<InstrumentSession> {
        &self.session
    }

    /// True while an analysis action is between its command and its return
    pub fn is_waiting(&self) -> bool {
        self.lock_wait().is_some()
    }

    fn lock_wait(&self) -> MutexGuard<'_, Option<ActiveWait>> {
        self.wait.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register_wait(&self) -> WaitRegistration<'_> {
        let id = self.next_wait_id.fetch_add(1, Ordering::SeqCst);
        let token = CancellationToken::new();
        let previous = self.lock_wait().replace(ActiveWait {
            id,
            token: token.clone(),
        });
        if previous.is_some() {
            warn!("Starting an analysis while another one is still being awaited");
        }
        WaitRegistration {
            facade: self,
            id,
            token,
        }
    }

    /// End the wait in flight without sending any command; `true` if there was one
    pub fn interrupt_wait(&self) -> bool {
        match self.lock_wait().as_ref() {
            Some(active) => {
                active.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Run any catalog action
    pub async fn run(&self, request: ActionRequest) -> Result<ActionOutcome> {
        let span = operation_span(request.name(), "action_facade");
        async move {
            info!("Running action {}", request.name());
            match request {
                ActionRequest::PlasmaOn => self.plasma_on().await,
                ActionRequest::PlasmaOff => self.plasma_off().await,
                ActionRequest::MoveAutosampler { location } => self.move_autosampler(location).await,
                ActionRequest::StopAnalysis => self.stop_analysis().await,
                ActionRequest::StartAutoAnalysis(request) => {
                    self.start_auto_analysis(&request).await
                }
                ActionRequest::StartManualAnalysis(request) => {
                    self.start_manual_analysis(&request).await
                }
                ActionRequest::HgRealign => self.hg_realign().await,
                ActionRequest::LoadSampleInfo { file_path } => {
                    self.load_sample_info(&file_path).await
                }
                ActionRequest::LoadMethod { name } => self.load_method(&name).await,
            }
        }
        .instrument(span)
        .await
    }

    /// Turn on the plasma
    pub async fn plasma_on(&self) -> Result<ActionOutcome> {
        let response = self.session.plasma_on().await?;
        Ok(ActionOutcome::new("plasma_on", response))
    }

    /// Turn off the plasma
    pub async fn plasma_off(&self) -> Result<ActionOutcome> {
        let response = self.session.plasma_off().await?;
        Ok(ActionOutcome::new("plasma_off", response))
    }

    /// Move the autosampler to `location`
    pub async fn move_autosampler(&self, location: i32) -> Result<ActionOutcome> {
        let response = self.session.move_autosampler(location).await?;
        Ok(ActionOutcome::new("move_autosampler", response))
    }

    /// Halt the current analysis; an awaited analysis keeps waiting for Idle
    pub async fn stop_analysis(&self) -> Result<ActionOutcome> {
        let response = self.session.stop_analysis().await?;
        Ok(ActionOutcome::new("stop_analysis", response))
    }

    /// Realign on the mercury lamp
    pub async fn hg_realign(&self) -> Result<ActionOutcome> {
        let response = self.session.hg_realign().await?;
        Ok(ActionOutcome::new("hg_realign", response))
    }

    /// Upload a sample info file
    pub async fn load_sample_info(&self, file_path: &str) -> Result<ActionOutcome> {
        let response = self.session.load_sample_info(file_path).await?;
        Ok(ActionOutcome::new("load_sample_info", response))
    }

    /// Load a stored method
    pub async fn load_method(&self, name: &str) -> Result<ActionOutcome> {
        let response = self.session.load_method(name).await?;
        Ok(ActionOutcome::new("load_method", response))
    }

    /// Start a batch analysis and, unless told otherwise, wait for it
    pub async fn start_auto_analysis(&self, request: &AutoAnalysisRequest) -> Result<ActionOutcome> {
        let analysis = request.to_analysis();
        self.analyse(
            "start_auto_analysis",
            analysis.command(),
            request.wait_for_completion,
        )
        .await
    }

    /// Start a single-item analysis and, unless told otherwise, wait for it
    ///
    /// A request without any selector fails before a command is issued.
    pub async fn start_manual_analysis(
        &self,
        request: &ManualAnalysisRequest,
    ) -> Result<ActionOutcome> {
        let target = request.target()?;
        self.analyse(
            "start_manual_analysis",
            target.command(),
            request.wait_for_completion,
        )
        .await
    }

    async fn analyse(
        &self,
        action: &str,
        command: Command,
        wait_override: Option<bool>,
    ) -> Result<ActionOutcome> {
        let wait = wait_override.unwrap_or(self.analysis.wait_for_completion);
        let registration = self.register_wait();

        let response = self.session.execute(command).await?;
        self.session.query_analysis_status().await?;

        let analysis_status = if wait {
            let settings = WaitSettings::from(&self.analysis);
            wait_for_completion(&self.session, &settings, &registration.token).await?
        } else {
            self.session.analysis_status()
        };

        Ok(ActionOutcome {
            action: action.to_string(),
            response,
            analysis_status,
        })
    }

    /// Stop the analysis and rewind the sequence, ending any wait
    pub async fn cancel(&self) -> Result<ActionOutcome> {
        self.interrupt(Interrupt::Cancel).await
    }

    /// Stop the analysis, ending any wait
    pub async fn pause(&self) -> Result<ActionOutcome> {
        self.interrupt(Interrupt::Pause).await
    }

    /// Stop the analysis, ending any wait
    pub async fn safety_stop(&self) -> Result<ActionOutcome> {
        self.interrupt(Interrupt::SafetyStop).await
    }

    /// Handle an admin interrupt
    pub async fn interrupt(&self, kind: Interrupt) -> Result<ActionOutcome> {
        let span = operation_span(kind.name(), "action_facade");
        async {
            if self.interrupt_wait() {
                info!("Interrupted the analysis wait");
            }
            let mut response = self.session.stop_analysis().await?;
            if kind == Interrupt::Cancel {
                response = self.session.reset_analysis_sequence().await?;
            }
            Ok(ActionOutcome::new(kind.name(), response))
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use icpflow_core::config::InstrumentConfig;
    use icpflow_core::error::Error;
    use icpflow_instrument::mock::MockRemoteControl;
    use icpflow_instrument::{ConnectOptions, RemoteControl};

    async fn facade(mock: &Arc<MockRemoteControl>, analysis: AnalysisConfig) -> ActionFacade {
        let client: Arc<dyn RemoteControl> = mock.clone();
        let session = InstrumentSession::connect(
            client,
            ConnectOptions::new("sim", "sim", "facade_test"),
            &InstrumentConfig::default(),
        )
        .await
        .unwrap();
        ActionFacade::new(Arc::new(session), analysis)
    }

    fn manual_sample(wait: Option<bool>) -> ManualAnalysisRequest {
        ManualAnalysisRequest {
            sample_id: Some("S1".into()),
            wait_for_completion: wait,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_ends_at_final_idle() {
        let mock = Arc::new(MockRemoteControl::new());
        let facade = facade(&mock, AnalysisConfig::default()).await;
        mock.notify(icpflow_instrument::Notification::AnalysisStatus(0));
        mock.script_analysis([1, 2, 1, 0]);

        let started = tokio::time::Instant::now();
        let outcome = facade.start_manual_analysis(&manual_sample(None)).await.unwrap();

        assert_eq!(outcome.analysis_status, Some(AnalysisStatus::Idle));
        assert_eq!(outcome.response, "ManualAnalyzeSample OK");
        assert_eq!(started.elapsed(), Duration::from_secs(3));
        let queries = mock
            .command_names()
            .into_iter()
            .filter(|name| *name == "GetAnalysisStatus")
            .count();
        assert_eq!(queries, 4);
        assert!(!facade.is_waiting());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_wait_returns_after_one_query() {
        let mock = Arc::new(MockRemoteControl::new());
        let facade = facade(&mock, AnalysisConfig::default()).await;
        mock.script_analysis([1]);

        let outcome = facade.start_manual_analysis(&manual_sample(Some(false))).await.unwrap();
        assert_eq!(outcome.analysis_status, Some(AnalysisStatus::Running));
        assert_eq!(
            mock.command_names(),
            vec!["ManualAnalyzeSample", "GetAnalysisStatus"]
        );
    }

    #[tokio::test]
    async fn test_missing_selector_issues_nothing() {
        let mock = Arc::new(MockRemoteControl::new());
        let facade = facade(&mock, AnalysisConfig::default()).await;

        let err = facade
            .start_manual_analysis(&ManualAnalysisRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParameters(_)));
        assert!(mock.commands().is_empty());
    }

    #[tokio::test]
    async fn test_first_selector_wins_on_the_wire() {
        let mock = Arc::new(MockRemoteControl::new());
        let facade = facade(&mock, AnalysisConfig::default()).await;
        mock.script_analysis([0]);

        let request = ManualAnalysisRequest {
            sample_id: Some("S1".into()),
            blank_num: Some(2),
            wait_for_completion: Some(false),
            ..Default::default()
        };
        facade.start_manual_analysis(&request).await.unwrap();
        assert_eq!(
            mock.commands(),
            vec![Command::ManualAnalyzeSample("S1".into()), Command::GetAnalysisStatus]
        );
    }

    #[tokio::test]
    async fn test_interrupt_command_sets() {
        let mock = Arc::new(MockRemoteControl::new());
        let facade = facade(&mock, AnalysisConfig::default()).await;

        let outcome = facade.cancel().await.unwrap();
        assert_eq!(outcome.response, "ResetAnalysisSequence OK");
        assert_eq!(mock.command_names(), vec!["StopAnalysis", "ResetAnalysisSequence"]);

        mock.clear_commands();
        facade.pause().await.unwrap();
        assert_eq!(mock.command_names(), vec!["StopAnalysis"]);

        mock.clear_commands();
        facade.safety_stop().await.unwrap();
        assert_eq!(mock.command_names(), vec!["StopAnalysis"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out() {
        let mock = Arc::new(MockRemoteControl::new());
        let analysis = AnalysisConfig {
            poll_interval_ms: 1000,
            wait_timeout_secs: 5,
            wait_for_completion: true,
        };
        let facade = facade(&mock, analysis).await;
        mock.analysis_after_script(1);

        let started = tokio::time::Instant::now();
        let err = facade.start_manual_analysis(&manual_sample(None)).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert_eq!(started.elapsed(), Duration::from_secs(5));
        assert!(!facade.is_waiting());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_cancel_ends_wait() {
        let mock = Arc::new(MockRemoteControl::new());
        let facade = Arc::new(facade(&mock, AnalysisConfig::default()).await);
        mock.analysis_after_script(1);

        let waiter = {
            let facade = facade.clone();
            tokio::spawn(async move { facade.start_manual_analysis(&manual_sample(None)).await })
        };
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(facade.is_waiting());

        facade.cancel().await.unwrap();
        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Cancelled(_)));
        assert!(mock.command_names().contains(&"ResetAnalysisSequence"));
        assert!(!facade.is_waiting());
    }

    #[tokio::test(start_paused = true)]
    async fn test_callback_wakes_wait_early() {
        let mock = Arc::new(MockRemoteControl::new());
        let facade = Arc::new(facade(&mock, AnalysisConfig::default()).await);
        mock.analysis_after_script(1);

        let waiter = {
            let facade = facade.clone();
            tokio::spawn(async move { facade.start_manual_analysis(&manual_sample(None)).await })
        };
        tokio::time::sleep(Duration::from_millis(1500)).await;

        let started = tokio::time::Instant::now();
        mock.notify(icpflow_instrument::Notification::AnalysisStatus(0));
        let outcome = waiter.await.unwrap().unwrap();
        assert_eq!(outcome.analysis_status, Some(AnalysisStatus::Idle));
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_idle_does_not_end_wait() {
        let mock = Arc::new(MockRemoteControl::new());
        let facade = facade(&mock, AnalysisConfig::default()).await;
        mock.notify(icpflow_instrument::Notification::AnalysisStatus(0));
        mock.set_delivery_delay(Duration::from_millis(200));
        mock.script_analysis([1, 1, 1, 1, 1, 0]);

        let started = tokio::time::Instant::now();
        let outcome = facade.start_manual_analysis(&manual_sample(None)).await.unwrap();

        assert_eq!(outcome.analysis_status, Some(AnalysisStatus::Idle));
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert_eq!(started.elapsed(), Duration::from_millis(5200));
        let queries = mock
            .command_names()
            .into_iter()
            .filter(|name| *name == "GetAnalysisStatus")
            .count();
        assert_eq!(queries, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_outlasts_slow_first_reply() {
        let mock = Arc::new(MockRemoteControl::new());
        let facade = facade(&mock, AnalysisConfig::default()).await;
        mock.notify(icpflow_instrument::Notification::AnalysisStatus(0));
        mock.set_delivery_delay(Duration::from_millis(1500));
        mock.script_analysis([1, 1, 0]);

        let outcome = facade.start_manual_analysis(&manual_sample(None)).await.unwrap();
        assert_eq!(outcome.analysis_status, Some(AnalysisStatus::Idle));
        assert_eq!(mock.commands().last(), Some(&Command::GetAnalysisStatus));
        assert!(mock
            .command_names()
            .iter()
            .filter(|name| **name == "GetAnalysisStatus")
            .count()
            >= 3);
    }

    #[tokio::test]
    async fn test_rejected_action_keeps_response() {
        let mock = Arc::new(MockRemoteControl::new());
        mock.reject("PlasmaOn");
        let facade = facade(&mock, AnalysisConfig::default()).await;

        let err = facade.run(ActionRequest::PlasmaOn).await.unwrap_err();
        assert_eq!(err.response(), Some("PlasmaOn failed"));
        let outcome = facade.run(ActionRequest::MoveAutosampler { location: 4 }).await.unwrap();
        assert_eq!(outcome.action, "move_autosampler");
        assert_eq!(mock.commands().last(), Some(&Command::MoveAutosampler(4)));
    }
}
