/*!
 * The vendor remote-control seam.
 *
 * `RemoteControl` is what the session drives: a connect/disconnect pair, a
 * command executor, the vendor's last raw response, and a slot for the
 * notification handler. Marshaling callbacks out of the vendor runtime is the
 * implementor's job; the session only sees `NotificationHandler` calls.
 */
use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Addressing used to open a vendor session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectOptions {
    /// Address of the machine running the vendor control service
    pub server_address: String,
    /// Address of this client
    pub client_address: String,
    /// Session name announced to the vendor service
    pub session_name: String,
    /// Installation directory of the vendor library
    pub library_path: Option<PathBuf>,
}

impl ConnectOptions {
    /// Creates connect options without a library path
    pub fn new<S: Into<String>, C: Into<String>, N: Into<String>>(
        server_address: S,
        client_address: C,
        session_name: N,
    ) -> Self {
        Self {
            server_address: server_address.into(),
            client_address: client_address.into(),
            session_name: session_name.into(),
            library_path: None,
        }
    }

    /// Sets the vendor library path
    pub fn with_library_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.library_path = Some(path.into());
        self
    }
}

impl From<&icpflow_core::config::InstrumentConfig> for ConnectOptions {
    fn from(config: &icpflow_core::config::InstrumentConfig) -> Self {
        let options = ConnectOptions::new(
            config.server_address.clone(),
            config.client_address.clone(),
            config.session_name.clone(),
        );
        if config.library_path.is_empty() {
            options
        } else {
            options.with_library_path(&config.library_path)
        }
    }
}

/// Shared arguments of the two auto-analysis commands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoAnalysisParams {
    /// Method to analyse with
    pub method_name: String,
    /// Dataset the results are written to
    pub dataset_name: String,
    /// Sample info file describing the batch
    pub sample_info_name: String,
    /// Export template applied to results
    pub export_template_name: String,
    /// Wavelength realignment mode
    pub wavelength_realign: i32,
}

/// A command understood by the vendor service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Ignite the plasma
    PlasmaOn,
    /// Extinguish the plasma
    PlasmaOff,
    /// Move the autosampler to a location
    MoveAutosampler(i32),
    /// Halt the current analysis
    StopAnalysis,
    /// Rewind the analysis sequence pointer
    ResetAnalysisSequence,
    /// Precalibrate, then analyse everything in the sample info file
    AutoAnalyzeAll {
        /// Batch arguments
        params: AutoAnalysisParams,
        /// Use the method already active in the software instead of `method_name`
        use_active_method: bool,
    },
    /// Analyse the samples of the sample info file without calibrating
    AutoAnalyzeSamples {
        /// Batch arguments
        params: AutoAnalysisParams,
    },
    /// Analyse one sample by id
    ManualAnalyzeSample(String),
    /// Analyse a calibration blank
    ManualAnalyzeBlank(i32),
    /// Analyse a calibration standard
    ManualAnalyzeStd(i32),
    /// Analyse a QC check
    ManualAnalyzeQc(i32),
    /// Load a stored method
    LoadMethod(String),
    /// Upload a sample info file
    DownloadSampleInfoFile(String),
    /// Realign on the mercury lamp
    HgRealign,
    /// Request a plasma-status callback
    GetPlasmaStatus,
    /// Request an instrument-status callback
    GetInstrumentStatus,
    /// Request an analysis-status callback
    GetAnalysisStatus,
    /// List stored methods into the response text
    GetMethodsList,
}

impl Command {
    /// Vendor name of the command
    pub fn name(&self) -> &'static str {
        match self {
            Command::PlasmaOn => "PlasmaOn",
            Command::PlasmaOff => "PlasmaOff",
            Command::MoveAutosampler(_) => "MoveAutosampler",
            Command::StopAnalysis => "StopAnalysis",
            Command::ResetAnalysisSequence => "ResetAnalysisSequence",
            Command::AutoAnalyzeAll { .. } => "AutoAnalyzeAll",
            Command::AutoAnalyzeSamples { .. } => "AutoAnalyzeSamples",
            Command::ManualAnalyzeSample(_) => "ManualAnalyzeSample",
            Command::ManualAnalyzeBlank(_) => "ManualAnalyzeBlank",
            Command::ManualAnalyzeStd(_) => "ManualAnalyzeStd",
            Command::ManualAnalyzeQc(_) => "ManualAnalyzeQC",
            Command::LoadMethod(_) => "LoadMethod",
            Command::DownloadSampleInfoFile(_) => "DownloadSampleInfoFile",
            Command::HgRealign => "HgRealign",
            Command::GetPlasmaStatus => "GetPlasmaStatus",
            Command::GetInstrumentStatus => "GetInstrumentStatus",
            Command::GetAnalysisStatus => "GetAnalysisStatus",
            Command::GetMethodsList => "GetMethodsList",
        }
    }

    /// True for commands that start an analysis
    pub fn starts_analysis(&self) -> bool {
        matches!(
            self,
            Command::AutoAnalyzeAll { .. }
                | Command::AutoAnalyzeSamples { .. }
                | Command::ManualAnalyzeSample(_)
                | Command::ManualAnalyzeBlank(_)
                | Command::ManualAnalyzeStd(_)
                | Command::ManualAnalyzeQc(_)
        )
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One asynchronous notification from the vendor service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Notification {
    /// Free-text status message
    Status(String),
    /// Instrument error
    Error {
        /// Vendor error code
        code: i32,
        /// Vendor error message
        message: String,
        /// Vendor severity
        severity: i32,
    },
    /// Plasma status code
    PlasmaStatus(i32),
    /// Analysis status code
    AnalysisStatus(i32),
    /// Sample currently being analysed
    AnalysisSample(String),
    /// Instrument status code
    InstrumentStatus(i32),
    /// Autosampler status code
    AutosamplerStatus(i32),
    /// Connection status code
    ConnectionStatus(i32),
}

/// The handler table registered with the vendor client
///
/// Each method updates one piece of cached state and must not fail; vendor
/// clients may call them from any thread, in any order.
pub trait NotificationHandler: Send + Sync {
    /// Free-text status message
    fn on_status(&self, text: &str);

    /// Instrument error report
    fn on_error(&self, code: i32, message: &str, severity: i32);

    /// Plasma status change
    fn on_plasma_status(&self, code: i32);

    /// Analysis status change
    fn on_analysis_status(&self, code: i32);

    /// Sample being analysed
    fn on_analysis_sample(&self, sample_id: &str);

    /// Instrument status change
    fn on_instrument_status(&self, code: i32);

    /// Autosampler status change
    fn on_autosampler_status(&self, code: i32);

    /// Connection status change
    fn on_connection_status(&self, code: i32);

    /// Route a notification to the matching handler
    fn dispatch(&self, notification: &Notification) {
        match notification {
            Notification::Status(text) => self.on_status(text),
            Notification::Error {
                code,
                message,
                severity,
            } => self.on_error(*code, message, *severity),
            Notification::PlasmaStatus(code) => self.on_plasma_status(*code),
            Notification::AnalysisStatus(code) => self.on_analysis_status(*code),
            Notification::AnalysisSample(id) => self.on_analysis_sample(id),
            Notification::InstrumentStatus(code) => self.on_instrument_status(*code),
            Notification::AutosamplerStatus(code) => self.on_autosampler_status(*code),
            Notification::ConnectionStatus(code) => self.on_connection_status(*code),
        }
    }
}

/// Vendor remote-control client
#[async_trait]
pub trait RemoteControl: Send + Sync + Debug {
    /// Install the handler table; called before `connect`
    fn register_handler(&self, handler: Arc<dyn NotificationHandler>);

    /// Names of instrument and autosampler status codes, as known to the vendor library
    fn instrument_status_names(&self) -> HashMap<i32, String> {
        HashMap::new()
    }

    /// Open the vendor session; `true` when the handshake succeeded
    async fn connect(&self, options: &ConnectOptions) -> bool;

    /// Close the vendor session; `true` when the service accepted it
    async fn disconnect(&self) -> bool;

    /// Execute a command; `true` when the service accepted it
    async fn execute(&self, command: &Command) -> bool;

    /// Raw text of the last response
    async fn response(&self) -> String;
}
