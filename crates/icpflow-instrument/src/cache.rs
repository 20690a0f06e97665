/*!
 * Cached instrument status fed by vendor callbacks.
 *
 * A single lock guards the whole snapshot; callbacks are infrequent and each
 * one touches exactly one field. Poisoned locks are recovered so a callback
 * never panics on the vendor's delivery thread.
 */
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, trace, warn};

use crate::remote::{Notification, NotificationHandler};
use crate::status::{
    AnalysisStatus, InstrumentError, PlasmaStatus, StatusMessage, StatusReading, StatusSnapshot,
    CONNECTED_CODE, UNKNOWN_LABEL,
};

/// Capacity of the notification broadcast channel
const NOTIFICATION_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Default)]
struct CacheState {
    connection_status: Option<bool>,
    plasma_status: Option<StatusReading>,
    instrument_status: Option<StatusReading>,
    analysis_status: Option<StatusReading>,
    autosampler_status: Option<StatusReading>,
    current_sample_id: Option<String>,
    status_log: VecDeque<StatusMessage>,
    error_log: BTreeMap<i32, InstrumentError>,
}

/// Latest known instrument status, safe to update from any thread
#[derive(Debug)]
pub struct StatusCache {
    state: RwLock<CacheState>,
    status_log_capacity: usize,
    instrument_names: HashMap<i32, String>,
    analysis_tx: watch::Sender<Option<AnalysisStatus>>,
    notifications: broadcast::Sender<Notification>,
}

impl StatusCache {
    /// Create an empty cache retaining at most `status_log_capacity` messages
    pub fn new(status_log_capacity: usize) -> Self {
        Self::with_instrument_names(status_log_capacity, HashMap::new())
    }

    /// Create an empty cache with vendor names for instrument and autosampler codes
    pub fn with_instrument_names(
        status_log_capacity: usize,
        instrument_names: HashMap<i32, String>,
    ) -> Self {
        let (analysis_tx, _) = watch::channel(None);
        let (notifications, _) = broadcast::channel(NOTIFICATION_CHANNEL_CAPACITY);
        Self {
            state: RwLock::new(CacheState::default()),
            status_log_capacity: status_log_capacity.max(1),
            instrument_names,
            analysis_tx,
            notifications,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, CacheState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, notification: Notification) {
        // No subscribers is the normal case outside of tests and the module server.
        let _ = self.notifications.send(notification);
    }

    fn instrument_label(&self, code: i32) -> String {
        self.instrument_names
            .get(&code)
            .cloned()
            .unwrap_or_else(|| UNKNOWN_LABEL.to_string())
    }

    /// Copy of every cached field
    pub fn snapshot(&self) -> StatusSnapshot {
        let state = self.read();
        StatusSnapshot {
            connection_status: state.connection_status,
            plasma_status: state.plasma_status.clone(),
            instrument_status: state.instrument_status.clone(),
            analysis_status: state.analysis_status.clone(),
            autosampler_status: state.autosampler_status.clone(),
            current_sample_id: state.current_sample_id.clone(),
            status_log: state.status_log.iter().cloned().collect(),
            error_log: state.error_log.clone(),
        }
    }

    /// Last analysis status, if any
    pub fn analysis_status(&self) -> Option<AnalysisStatus> {
        self.read()
            .analysis_status
            .as_ref()
            .map(|reading| AnalysisStatus::from_code(reading.code))
    }

    /// Last connection status, if any
    pub fn connection_status(&self) -> Option<bool> {
        self.read().connection_status
    }

    /// Watch the analysis status; every callback marks the value as changed
    pub fn watch_analysis(&self) -> watch::Receiver<Option<AnalysisStatus>> {
        self.analysis_tx.subscribe()
    }

    /// Subscribe to every notification applied to the cache
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    /// Maximum number of retained status messages
    pub fn status_log_capacity(&self) -> usize {
        self.status_log_capacity
    }
}

impl NotificationHandler for StatusCache {
    fn on_status(&self, text: &str) {
        trace!(status = %text, "status message");
        {
            let mut state = self.write();
            while state.status_log.len() >= self.status_log_capacity {
                state.status_log.pop_front();
            }
            state.status_log.push_back(StatusMessage {
                text: text.to_string(),
                received_at: Utc::now(),
            });
        }
        self.publish(Notification::Status(text.to_string()));
    }

    fn on_error(&self, code: i32, message: &str, severity: i32) {
        warn!(code, severity, "instrument error: {}", message);
        self.write().error_log.insert(
            code,
            InstrumentError {
                message: message.to_string(),
                severity,
                reported_at: Utc::now(),
            },
        );
        self.publish(Notification::Error {
            code,
            message: message.to_string(),
            severity,
        });
    }

    fn on_plasma_status(&self, code: i32) {
        let status = PlasmaStatus::from_code(code);
        debug!(code, "plasma status: {}", status.label());
        self.write().plasma_status = Some(StatusReading::new(code, status.label()));
        self.publish(Notification::PlasmaStatus(code));
    }

    fn on_analysis_status(&self, code: i32) {
        let status = AnalysisStatus::from_code(code);
        debug!(code, "analysis status: {}", status.label());
        {
            let mut state = self.write();
            state.analysis_status = Some(StatusReading::new(code, status.label()));
            self.analysis_tx.send_replace(Some(status));
        }
        self.publish(Notification::AnalysisStatus(code));
    }

    fn on_analysis_sample(&self, sample_id: &str) {
        debug!(sample_id = %sample_id, "analysing sample");
        self.write().current_sample_id = Some(sample_id.to_string());
        self.publish(Notification::AnalysisSample(sample_id.to_string()));
    }

    fn on_instrument_status(&self, code: i32) {
        let label = self.instrument_label(code);
        debug!(code, "instrument status: {}", label);
        self.write().instrument_status = Some(StatusReading::new(code, label));
        self.publish(Notification::InstrumentStatus(code));
    }

    fn on_autosampler_status(&self, code: i32) {
        let label = self.instrument_label(code);
        debug!(code, "autosampler status: {}", label);
        self.write().autosampler_status = Some(StatusReading::new(code, label));
        self.publish(Notification::AutosamplerStatus(code));
    }

    fn on_connection_status(&self, code: i32) {
        let connected = code == CONNECTED_CODE;
        debug!(code, connected, "connection status");
        self.write().connection_status = Some(connected);
        self.publish(Notification::ConnectionStatus(code));
    }
}
