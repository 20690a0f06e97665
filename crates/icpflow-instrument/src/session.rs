/*!
 * The instrument session.
 *
 * One session owns one vendor connection. The handler table is registered
 * before the handshake so the first status transitions are not lost, and
 * every command result is read back through the vendor's `Response()` text.
 */
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn, Instrument};

use icpflow_core::config::InstrumentConfig;
use icpflow_core::error::{Error, Result};
use icpflow_core::logging::{component_span, operation_span};
use icpflow_core::utils::{spawn_and_log, with_optional_timeout};

use crate::cache::StatusCache;
use crate::remote::{AutoAnalysisParams, Command, ConnectOptions, Notification, RemoteControl};
use crate::status::{AnalysisStatus, StatusSnapshot};

/// Request for a batch analysis over a sample info file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoAnalysis {
    /// Batch arguments
    pub params: AutoAnalysisParams,
    /// Precalibrate and analyse everything, instead of analysing samples only
    pub precalibrate: bool,
    /// Use the method active in the software; only honoured with `precalibrate`
    pub use_active_method: bool,
}

impl AutoAnalysis {
    /// The vendor command this request maps to
    pub fn command(&self) -> Command {
        if self.precalibrate {
            Command::AutoAnalyzeAll {
                params: self.params.clone(),
                use_active_method: self.use_active_method,
            }
        } else {
            Command::AutoAnalyzeSamples {
                params: self.params.clone(),
            }
        }
    }
}

/// What a single-item (manual) analysis measures
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManualTarget {
    /// A sample by id
    Sample(String),
    /// A calibration blank by number
    Blank(i32),
    /// A calibration standard by number
    Standard(i32),
    /// A QC check by number
    Qc(i32),
}

impl ManualTarget {
    /// The vendor command this target maps to
    pub fn command(&self) -> Command {
        match self {
            ManualTarget::Sample(id) => Command::ManualAnalyzeSample(id.clone()),
            ManualTarget::Blank(n) => Command::ManualAnalyzeBlank(*n),
            ManualTarget::Standard(n) => Command::ManualAnalyzeStd(*n),
            ManualTarget::Qc(n) => Command::ManualAnalyzeQc(*n),
        }
    }
}

/// A live connection to one instrument
pub struct InstrumentSession {
    client: Arc<dyn RemoteControl>,
    cache: Arc<StatusCache>,
    options: ConnectOptions,
    command_timeout: Option<Duration>,
    connected: AtomicBool,
}

impl fmt::Debug for InstrumentSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstrumentSession")
            .field("session_name", &self.options.session_name)
            .field("server_address", &self.options.server_address)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl InstrumentSession {
    /// Register the handler table and open the vendor session
    ///
    /// Fails with [`Error::ConnectionFailure`] when the vendor rejects the
    /// handshake, and with [`Error::Timeout`] when it does not answer within
    /// the configured command timeout.
    pub async fn connect(
        client: Arc<dyn RemoteControl>,
        options: ConnectOptions,
        settings: &InstrumentConfig,
    ) -> Result<Self> {
        let span = component_span("instrument_session", Some(options.session_name.as_str()));
        async move {
            let cache = Arc::new(StatusCache::with_instrument_names(
                settings.status_log_capacity,
                client.instrument_status_names(),
            ));
            client.register_handler(cache.clone());

            info!(
                server = %options.server_address,
                client = %options.client_address,
                "Connecting to instrument control service"
            );
            let command_timeout = settings.command_timeout();
            let accepted = with_optional_timeout(command_timeout, "Connect", async {
                Ok(client.connect(&options).await)
            })
            .await?;

            if !accepted {
                let response = client.response().await;
                warn!("Instrument control service rejected the connection: {}", response);
                return Err(Error::connection(format!(
                    "{} rejected session {}: {}",
                    options.server_address, options.session_name, response
                )));
            }

            info!("Connected to instrument control service");
            Ok(Self {
                client,
                cache,
                options,
                command_timeout,
                connected: AtomicBool::new(true),
            })
        }
        .instrument(span)
        .await
    }

    /// Close the vendor session; calling it again is a no-op
    pub async fn disconnect(&self) -> Result<()> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            debug!("Session {} already disconnected", self.options.session_name);
            return Ok(());
        }

        info!("Disconnecting session {}", self.options.session_name);
        let accepted = with_optional_timeout(self.command_timeout, "Disconnect", async {
            Ok(self.client.disconnect().await)
        })
        .await?;

        if accepted {
            Ok(())
        } else {
            let response = self.client.response().await;
            Err(Error::connection(format!("disconnect rejected: {}", response)))
        }
    }

    /// True until `disconnect` has been called
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Addressing the session was opened with
    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    /// The status cache fed by this session's callbacks
    pub fn cache(&self) -> &Arc<StatusCache> {
        &self.cache
    }

    /// Copy of the cached status
    pub fn snapshot(&self) -> StatusSnapshot {
        self.cache.snapshot()
    }

    /// Last cached analysis status
    pub fn analysis_status(&self) -> Option<AnalysisStatus> {
        self.cache.analysis_status()
    }

    /// Watch analysis-status callbacks
    pub fn watch_analysis(&self) -> watch::Receiver<Option<AnalysisStatus>> {
        self.cache.watch_analysis()
    }

    /// Subscribe to all notifications
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.cache.subscribe()
    }

    /// Run one vendor command and return the vendor's response text
    pub async fn execute(&self, command: Command) -> Result<String> {
        if !self.is_connected() {
            return Err(Error::connection(format!(
                "cannot run {}: session {} is disconnected",
                command, self.options.session_name
            )));
        }

        let span = operation_span(command.name(), "instrument_session");
        async {
            let accepted = with_optional_timeout(self.command_timeout, command.name(), async {
                Ok(self.client.execute(&command).await)
            })
            .await?;
            let response = self.client.response().await;

            if accepted {
                debug!(response = %response, "command accepted");
                Ok(response)
            } else {
                warn!(response = %response, "command rejected");
                Err(Error::rejected(command.name(), response))
            }
        }
        .instrument(span)
        .await
    }

    /// Ask for a plasma-status callback
    pub async fn query_plasma_status(&self) -> Result<String> {
        self.execute(Command::GetPlasmaStatus).await
    }

    /// Ask for an instrument-status callback
    pub async fn query_instrument_status(&self) -> Result<String> {
        self.execute(Command::GetInstrumentStatus).await
    }

    /// Ask for an analysis-status callback; the cache updates when it arrives
    pub async fn query_analysis_status(&self) -> Result<String> {
        self.execute(Command::GetAnalysisStatus).await
    }

    /// Names of the methods stored in the instrument software
    pub async fn query_methods(&self) -> Result<Vec<String>> {
        let response = self.execute(Command::GetMethodsList).await?;
        Ok(parse_methods(&response))
    }

    /// Start a batch analysis
    pub async fn send_auto_analysis(&self, request: &AutoAnalysis) -> Result<String> {
        if !request.precalibrate && request.use_active_method {
            debug!("use_active_method ignored without precalibrate");
        }
        self.execute(request.command()).await
    }

    /// Start a single-item analysis
    pub async fn send_manual_analysis(&self, target: &ManualTarget) -> Result<String> {
        self.execute(target.command()).await
    }

    /// Ignite the plasma
    pub async fn plasma_on(&self) -> Result<String> {
        self.execute(Command::PlasmaOn).await
    }

    /// Extinguish the plasma
    pub async fn plasma_off(&self) -> Result<String> {
        self.execute(Command::PlasmaOff).await
    }

    /// Move the autosampler
    pub async fn move_autosampler(&self, location: i32) -> Result<String> {
        self.execute(Command::MoveAutosampler(location)).await
    }

    /// Halt the current analysis
    pub async fn stop_analysis(&self) -> Result<String> {
        self.execute(Command::StopAnalysis).await
    }

    /// Rewind the analysis sequence
    pub async fn reset_analysis_sequence(&self) -> Result<String> {
        self.execute(Command::ResetAnalysisSequence).await
    }

    /// Load a stored method
    pub async fn load_method(&self, name: &str) -> Result<String> {
        self.execute(Command::LoadMethod(name.to_string())).await
    }

    /// Upload a sample info file
    pub async fn load_sample_info(&self, file_path: &str) -> Result<String> {
        self.execute(Command::DownloadSampleInfoFile(file_path.to_string()))
            .await
    }

    /// Realign on the mercury lamp
    pub async fn hg_realign(&self) -> Result<String> {
        self.execute(Command::HgRealign).await
    }
}

impl Drop for InstrumentSession {
    fn drop(&mut self) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        warn!(
            "Session {} dropped while connected, releasing it",
            self.options.session_name
        );
        if tokio::runtime::Handle::try_current().is_err() {
            warn!("No runtime available to release the vendor session");
            return;
        }
        let client = self.client.clone();
        spawn_and_log("release_session", async move {
            if client.disconnect().await {
                Ok(())
            } else {
                Err(Error::connection("disconnect rejected on drop"))
            }
        });
    }
}

fn parse_methods(response: &str) -> Vec<String> {
    response
        .split(|c| c == '\n' || c == '\r' || c == ';' || c == ',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}
