/*!
 * Simulated Syngistix instrument.
 *
 * Behaves like the vendor service closely enough to run the module without
 * hardware: plasma ignition takes time, analyses run sample by sample on a
 * background task, and every state change arrives through the notification
 * handler from a different task than the one issuing the command.
 */
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::remote::{Command, ConnectOptions, Notification, NotificationHandler, RemoteControl};
use crate::status::{AnalysisStatus, PlasmaStatus, CONNECTED_CODE};

/// Instrument-status codes reported by the simulator
pub mod instrument_codes {
    /// Instrument not ready
    pub const NOT_READY: i32 = 0;
    /// Instrument ready
    pub const READY: i32 = 1;
    /// Instrument busy
    pub const BUSY: i32 = 2;
}

/// Timing of the simulated instrument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulationTiming {
    /// Time for the plasma to ignite or extinguish
    pub plasma_transition: Duration,
    /// Time to move the autosampler
    pub autosampler_move: Duration,
    /// Time to analyse one item
    pub sample_duration: Duration,
    /// Number of samples in a simulated batch
    pub batch_size: usize,
}

impl Default for SimulationTiming {
    fn default() -> Self {
        Self {
            plasma_transition: Duration::from_secs(2),
            autosampler_move: Duration::from_millis(500),
            sample_duration: Duration::from_secs(3),
            batch_size: 5,
        }
    }
}

struct SimState {
    handler: Option<Arc<dyn NotificationHandler>>,
    connected: bool,
    plasma: PlasmaStatus,
    analysis: AnalysisStatus,
    instrument: i32,
    active_method: Option<String>,
    sample_info: Option<String>,
    methods: Vec<String>,
    sequence_position: usize,
    response: String,
    run: Option<JoinHandle<()>>,
}

impl SimState {
    fn reply<S: Into<String>>(&mut self, accepted: bool, response: S) -> bool {
        self.response = response.into();
        accepted
    }

    fn stop_run(&mut self) -> bool {
        match self.run.take() {
            Some(run) => {
                run.abort();
                true
            }
            None => false,
        }
    }
}

/// A [`RemoteControl`] that simulates an ICP-OES instrument in memory
pub struct SimulatedInstrument {
    state: Arc<Mutex<SimState>>,
    timing: SimulationTiming,
}

impl fmt::Debug for SimulatedInstrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("SimulatedInstrument")
            .field("connected", &state.connected)
            .field("plasma", &state.plasma)
            .field("analysis", &state.analysis)
            .field("timing", &self.timing)
            .finish()
    }
}

impl Default for SimulatedInstrument {
    fn default() -> Self {
        Self::new(SimulationTiming::default())
    }
}

fn lock(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn deliver(handler: &Option<Arc<dyn NotificationHandler>>, notifications: &[Notification]) {
    if let Some(handler) = handler {
        for notification in notifications {
            handler.dispatch(notification);
        }
    }
}

impl SimulatedInstrument {
    /// Create a simulator with the given timing
    pub fn new(timing: SimulationTiming) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                handler: None,
                connected: false,
                plasma: PlasmaStatus::Off,
                analysis: AnalysisStatus::Idle,
                instrument: instrument_codes::NOT_READY,
                active_method: None,
                sample_info: None,
                methods: vec![
                    "Metals in Water".to_string(),
                    "Trace Elements".to_string(),
                    "Soil Digest".to_string(),
                ],
                sequence_position: 0,
                response: String::new(),
                run: None,
            })),
            timing,
        }
    }

    /// Replace the stored method list
    pub fn with_methods<I: IntoIterator<Item = S>, S: Into<String>>(self, methods: I) -> Self {
        lock(&self.state).methods = methods.into_iter().map(Into::into).collect();
        self
    }

    /// Current simulated plasma state
    pub fn plasma(&self) -> PlasmaStatus {
        lock(&self.state).plasma
    }

    /// Current simulated analysis state
    pub fn analysis(&self) -> AnalysisStatus {
        lock(&self.state).analysis
    }

    /// Method loaded by `LoadMethod`
    pub fn active_method(&self) -> Option<String> {
        lock(&self.state).active_method.clone()
    }

    fn transition_plasma(&self, target: PlasmaStatus) -> bool {
        let via = match target {
            PlasmaStatus::On => PlasmaStatus::Igniting,
            _ => PlasmaStatus::Extinguishing,
        };

        let handler = {
            let mut state = lock(&self.state);
            if state.plasma == target {
                return state.reply(true, target.label());
            }
            if state.plasma == via {
                return state.reply(true, format!("{} already in progress", via.label()));
            }
            if target == PlasmaStatus::Off && state.analysis.is_active() {
                return state.reply(false, "Cannot extinguish plasma during an analysis");
            }
            state.plasma = via;
            state.reply(true, via.label());
            state.handler.clone()
        };
        deliver(&handler, &[Notification::PlasmaStatus(via.code())]);

        let shared = self.state.clone();
        let delay = self.timing.plasma_transition;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let handler = {
                let mut state = lock(&shared);
                if state.plasma != via {
                    return;
                }
                state.plasma = target;
                state.handler.clone()
            };
            deliver(
                &handler,
                &[
                    Notification::PlasmaStatus(target.code()),
                    Notification::Status(target.label().to_string()),
                ],
            );
        });
        true
    }

    fn move_autosampler(&self, location: i32) -> bool {
        let handler = {
            let mut state = lock(&self.state);
            if location < 0 {
                return state.reply(false, format!("Invalid autosampler location {}", location));
            }
            if state.analysis.is_active() {
                return state.reply(false, "Autosampler is in use by the running analysis");
            }
            state.reply(true, format!("Moving autosampler to {}", location));
            state.handler.clone()
        };
        deliver(&handler, &[Notification::AutosamplerStatus(instrument_codes::BUSY)]);

        let delay = self.timing.autosampler_move;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            deliver(
                &handler,
                &[
                    Notification::AutosamplerStatus(instrument_codes::READY),
                    Notification::Status(format!("Autosampler at location {}", location)),
                ],
            );
        });
        true
    }

    fn start_analysis(&self, command: &Command) -> bool {
        let (handler, samples) = {
            let mut state = lock(&self.state);
            if state.plasma != PlasmaStatus::On {
                return state.reply(false, "Plasma must be on to analyse");
            }
            if state.analysis.is_active() {
                return state.reply(false, "An analysis is already running");
            }

            let samples = match command {
                Command::AutoAnalyzeAll { params, .. } | Command::AutoAnalyzeSamples { params } => {
                    if state.sample_info.is_none() && params.sample_info_name.is_empty() {
                        return state.reply(false, "No sample info file loaded");
                    }
                    let mut items = Vec::new();
                    if matches!(command, Command::AutoAnalyzeAll { .. }) {
                        items.push("Calibration Blank".to_string());
                        items.push("Calibration Std 1".to_string());
                    }
                    let start = state.sequence_position;
                    items.extend(
                        (start..start + self.timing.batch_size)
                            .map(|i| format!("{}-{:03}", params.dataset_name, i + 1)),
                    );
                    state.sequence_position = start + self.timing.batch_size;
                    items
                }
                Command::ManualAnalyzeSample(id) => vec![id.clone()],
                Command::ManualAnalyzeBlank(n) => vec![format!("Calibration Blank {}", n)],
                Command::ManualAnalyzeStd(n) => vec![format!("Calibration Std {}", n)],
                Command::ManualAnalyzeQc(n) => vec![format!("QC {}", n)],
                _ => return state.reply(false, format!("{} is not an analysis", command)),
            };

            state.analysis = AnalysisStatus::Running;
            state.instrument = instrument_codes::BUSY;
            state.reply(true, format!("{} started ({} items)", command, samples.len()));
            (state.handler.clone(), samples)
        };
        deliver(
            &handler,
            &[
                Notification::AnalysisStatus(AnalysisStatus::Running.code()),
                Notification::InstrumentStatus(instrument_codes::BUSY),
            ],
        );

        let shared = self.state.clone();
        let sample_duration = self.timing.sample_duration;
        let run = tokio::spawn(async move {
            for sample in samples {
                deliver(&handler, &[Notification::AnalysisSample(sample.clone())]);
                tokio::time::sleep(sample_duration).await;
                debug!(sample = %sample, "simulated sample finished");
            }
            {
                let mut state = lock(&shared);
                state.analysis = AnalysisStatus::Idle;
                state.instrument = instrument_codes::READY;
                state.run = None;
            }
            deliver(
                &handler,
                &[
                    Notification::AnalysisStatus(AnalysisStatus::Idle.code()),
                    Notification::InstrumentStatus(instrument_codes::READY),
                    Notification::Status("Analysis complete".to_string()),
                ],
            );
        });
        lock(&self.state).run = Some(run);
        true
    }

    fn stop_analysis(&self) -> bool {
        let handler = {
            let mut state = lock(&self.state);
            let was_running = state.stop_run();
            state.analysis = AnalysisStatus::Idle;
            state.instrument = instrument_codes::READY;
            let message = if was_running {
                "Analysis stopped"
            } else {
                "No analysis running"
            };
            state.reply(true, message);
            state.handler.clone()
        };
        deliver(
            &handler,
            &[
                Notification::AnalysisStatus(AnalysisStatus::Idle.code()),
                Notification::InstrumentStatus(instrument_codes::READY),
            ],
        );
        true
    }

    fn answer_query(&self, command: &Command) -> bool {
        let (handler, notification) = {
            let mut state = lock(&self.state);
            let notification = match command {
                Command::GetPlasmaStatus => Notification::PlasmaStatus(state.plasma.code()),
                Command::GetInstrumentStatus => Notification::InstrumentStatus(state.instrument),
                _ => Notification::AnalysisStatus(state.analysis.code()),
            };
            state.reply(true, format!("{} requested", command));
            (state.handler.clone(), notification)
        };
        deliver(&handler, &[notification]);
        true
    }
}

#[async_trait]
impl RemoteControl for SimulatedInstrument {
    fn register_handler(&self, handler: Arc<dyn NotificationHandler>) {
        lock(&self.state).handler = Some(handler);
    }

    fn instrument_status_names(&self) -> HashMap<i32, String> {
        HashMap::from([
            (instrument_codes::NOT_READY, "NotReady".to_string()),
            (instrument_codes::READY, "Ready".to_string()),
            (instrument_codes::BUSY, "Busy".to_string()),
        ])
    }

    async fn connect(&self, options: &ConnectOptions) -> bool {
        info!(
            server = %options.server_address,
            library = ?options.library_path,
            "Simulated instrument accepting session {}",
            options.session_name
        );
        let handler = {
            let mut state = lock(&self.state);
            state.connected = true;
            state.instrument = instrument_codes::READY;
            state.reply(
                true,
                format!("Connected to {} as {}", options.server_address, options.session_name),
            );
            state.handler.clone()
        };
        deliver(
            &handler,
            &[
                Notification::ConnectionStatus(CONNECTED_CODE),
                Notification::InstrumentStatus(instrument_codes::READY),
                Notification::Status(format!("Remote session {} opened", options.session_name)),
            ],
        );
        true
    }

    async fn disconnect(&self) -> bool {
        let handler = {
            let mut state = lock(&self.state);
            state.stop_run();
            state.analysis = AnalysisStatus::Idle;
            state.connected = false;
            state.reply(true, "Disconnected");
            state.handler.clone()
        };
        deliver(&handler, &[Notification::ConnectionStatus(0)]);
        true
    }

    async fn execute(&self, command: &Command) -> bool {
        {
            let mut state = lock(&self.state);
            if !state.connected {
                return state.reply(false, "Not connected");
            }
        }

        match command {
            Command::PlasmaOn => self.transition_plasma(PlasmaStatus::On),
            Command::PlasmaOff => self.transition_plasma(PlasmaStatus::Off),
            Command::MoveAutosampler(location) => self.move_autosampler(*location),
            Command::StopAnalysis => self.stop_analysis(),
            Command::ResetAnalysisSequence => {
                let mut state = lock(&self.state);
                state.sequence_position = 0;
                state.reply(true, "Analysis sequence reset")
            }
            Command::AutoAnalyzeAll { .. }
            | Command::AutoAnalyzeSamples { .. }
            | Command::ManualAnalyzeSample(_)
            | Command::ManualAnalyzeBlank(_)
            | Command::ManualAnalyzeStd(_)
            | Command::ManualAnalyzeQc(_) => self.start_analysis(command),
            Command::LoadMethod(name) => {
                let mut state = lock(&self.state);
                if state.methods.iter().any(|m| m == name) {
                    state.active_method = Some(name.clone());
                    state.reply(true, format!("Method {} loaded", name))
                } else {
                    state.reply(false, format!("Method {} not found", name))
                }
            }
            Command::DownloadSampleInfoFile(path) => {
                let mut state = lock(&self.state);
                if path.trim().is_empty() {
                    state.reply(false, "Sample info file path is empty")
                } else {
                    state.sample_info = Some(path.clone());
                    state.sequence_position = 0;
                    state.reply(true, format!("Sample info {} downloaded", path))
                }
            }
            Command::HgRealign => {
                let handler = {
                    let mut state = lock(&self.state);
                    state.reply(true, "Hg realign complete");
                    state.handler.clone()
                };
                deliver(&handler, &[Notification::Status("Hg realign complete".to_string())]);
                true
            }
            Command::GetPlasmaStatus | Command::GetInstrumentStatus | Command::GetAnalysisStatus => {
                self.answer_query(command)
            }
            Command::GetMethodsList => {
                let mut state = lock(&self.state);
                let listing = state.methods.join("\n");
                state.reply(true, listing)
            }
        }
    }

    async fn response(&self) -> String {
        lock(&self.state).response.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::StatusCache;
    use crate::remote::AutoAnalysisParams;

    fn fast() -> SimulationTiming {
        SimulationTiming {
            plasma_transition: Duration::from_millis(100),
            autosampler_move: Duration::from_millis(50),
            sample_duration: Duration::from_millis(200),
            batch_size: 2,
        }
    }

    async fn connected() -> (SimulatedInstrument, Arc<StatusCache>) {
        let sim = SimulatedInstrument::new(fast());
        let cache = Arc::new(StatusCache::with_instrument_names(10, sim.instrument_status_names()));
        sim.register_handler(cache.clone());
        assert!(sim.connect(&ConnectOptions::new("sim", "sim", "test")).await);
        (sim, cache)
    }

    #[tokio::test(start_paused = true)]
    async fn test_plasma_ignites_after_delay() {
        let (sim, cache) = connected().await;
        assert!(sim.execute(&Command::PlasmaOn).await);
        assert_eq!(cache.snapshot().plasma(), Some(PlasmaStatus::Igniting));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(cache.snapshot().plasma(), Some(PlasmaStatus::On));
        assert_eq!(sim.plasma(), PlasmaStatus::On);
    }

    #[tokio::test(start_paused = true)]
    async fn test_analysis_requires_plasma() {
        let (sim, _cache) = connected().await;
        assert!(!sim.execute(&Command::ManualAnalyzeBlank(1)).await);
        assert_eq!(sim.response().await, "Plasma must be on to analyse");
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_runs_to_idle() {
        let (sim, cache) = connected().await;
        sim.execute(&Command::PlasmaOn).await;
        tokio::time::sleep(Duration::from_millis(150)).await;

        let params = AutoAnalysisParams {
            method_name: "Trace Elements".into(),
            dataset_name: "Run".into(),
            sample_info_name: "batch.sif".into(),
            export_template_name: String::new(),
            wavelength_realign: 0,
        };
        assert!(sim.execute(&Command::AutoAnalyzeSamples { params }).await);
        assert_eq!(cache.analysis_status(), Some(AnalysisStatus::Running));

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(cache.snapshot().current_sample_id.as_deref(), Some("Run-002"));

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(cache.analysis_status(), Some(AnalysisStatus::Idle));
        assert_eq!(cache.snapshot().instrument_status.unwrap().label, "Ready");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_interrupts_run() {
        let (sim, cache) = connected().await;
        sim.execute(&Command::PlasmaOn).await;
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(sim.execute(&Command::ManualAnalyzeSample("S1".into())).await);
        assert!(sim.execute(&Command::StopAnalysis).await);
        assert_eq!(sim.response().await, "Analysis stopped");
        assert_eq!(cache.analysis_status(), Some(AnalysisStatus::Idle));
        assert_eq!(sim.analysis(), AnalysisStatus::Idle);
    }

    #[tokio::test]
    async fn test_load_method_checks_list() {
        let (sim, _cache) = connected().await;
        assert!(sim.execute(&Command::LoadMethod("Soil Digest".into())).await);
        assert_eq!(sim.active_method().as_deref(), Some("Soil Digest"));
        assert!(!sim.execute(&Command::LoadMethod("Missing".into())).await);
        assert_eq!(sim.response().await, "Method Missing not found");
    }

    #[tokio::test]
    async fn test_commands_fail_before_connect() {
        let sim = SimulatedInstrument::new(fast());
        assert!(!sim.execute(&Command::PlasmaOn).await);
        assert_eq!(sim.response().await, "Not connected");
    }
}
