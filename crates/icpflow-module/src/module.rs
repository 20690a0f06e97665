/*!
 * The ICP module: lifecycle, state and action dispatch.
 *
 * `IcpModule::startup` owns the only session for the instrument. Any failure
 * after the session connects disconnects it again before the error is
 * returned, and `shutdown` releases it exactly once.
 */
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

use icpflow_core::config::SharedConfig;
use icpflow_core::error::{Error, Result};
use icpflow_core::logging::component_span;
use icpflow_engine::{catalog, ActionDefinition, ActionFacade, ActionRequest, Interrupt};
use icpflow_instrument::{ConnectOptions, InstrumentSession, RemoteControl};

use crate::state::{ModuleState, ModuleStatus};
use crate::step::StepResponse;

/// Commands accepted on `/admin`
pub const ADMIN_COMMANDS: [&str; 4] = ["cancel", "pause", "safety_stop", "shutdown"];

/// Static description of the module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleAbout {
    /// Module name
    pub name: String,
    /// Module version
    pub version: String,
    /// What the module controls
    pub description: String,
    /// Instrument model
    pub model: String,
    /// Identifier of this module instance
    pub instance_id: Uuid,
    /// When this instance started
    pub started_at: DateTime<Utc>,
    /// Actions accepted on `/action`
    pub actions: Vec<ActionDefinition>,
    /// Commands accepted on `/admin`
    pub admin_commands: Vec<String>,
}

/// Marks an action as in flight for as long as it lives
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A running ICP module
#[derive(Debug)]
pub struct IcpModule {
    config: SharedConfig,
    facade: ActionFacade,
    instance_id: Uuid,
    started_at: DateTime<Utc>,
    in_flight: AtomicUsize,
    last_error: RwLock<Option<String>>,
    shut_down: AtomicBool,
}

impl IcpModule {
    /// Connect the session and prepare the façade
    ///
    /// A rejected connection is fatal. The startup status queries run on the
    /// new session; if one fails the session is disconnected again.
    pub async fn startup(config: SharedConfig, client: Arc<dyn RemoteControl>) -> Result<Self> {
        let module_name = config.get().general.module_name.clone();
        let span = component_span("icp_module", Some(module_name.as_str()));
        async move {
            let settings = &config.get().instrument;
            let options = ConnectOptions::from(settings);
            let session = Arc::new(InstrumentSession::connect(client, options, settings).await?);

            if let Err(e) = Self::initial_queries(&session).await {
                error!("Startup status queries failed: {}", e);
                if let Err(disconnect_err) = session.disconnect().await {
                    warn!("Disconnect after failed startup also failed: {}", disconnect_err);
                }
                return Err(e);
            }

            let facade = ActionFacade::new(session, config.get().analysis.clone());
            let module = Self {
                config,
                facade,
                instance_id: Uuid::new_v4(),
                started_at: Utc::now(),
                in_flight: AtomicUsize::new(0),
                last_error: RwLock::new(None),
                shut_down: AtomicBool::new(false),
            };
            info!(instance = %module.instance_id, "Module started");
            Ok(module)
        }
        .instrument(span)
        .await
    }

    async fn initial_queries(session: &InstrumentSession) -> Result<()> {
        session.query_plasma_status().await?;
        session.query_instrument_status().await?;
        session.query_analysis_status().await?;
        Ok(())
    }

    /// Release the session; later calls are no-ops
    pub async fn shutdown(&self) -> Result<()> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Shutting down module {}", self.config.get().general.module_name);
        self.facade.interrupt_wait();
        self.facade.session().disconnect().await
    }

    /// True once `shutdown` has been called
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// The action façade
    pub fn facade(&self) -> &ActionFacade {
        &self.facade
    }

    /// Coarse module status
    pub fn status(&self) -> ModuleStatus {
        if self.in_flight.load(Ordering::SeqCst) > 0 {
            ModuleStatus::Busy
        } else if self.last_error().is_some() {
            ModuleStatus::Error
        } else {
            ModuleStatus::Ready
        }
    }

    fn last_error(&self) -> Option<String> {
        self.last_error
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, result: &Result<impl Sized>) {
        let mut slot = self.last_error.write().unwrap_or_else(PoisonError::into_inner);
        *slot = result.as_ref().err().map(ToString::to_string);
    }

    /// Query fresh status, then report the cached snapshot
    ///
    /// The queries only request callbacks; values that have not arrived yet
    /// are reported from the previous callbacks.
    pub async fn state(&self) -> ModuleState {
        let session = self.facade.session();
        let mut methods = None;
        if session.is_connected() {
            if let Err(e) = Self::initial_queries(session).await {
                warn!("Status query failed: {}", e);
            }
            methods = match session.query_methods().await {
                Ok(methods) => Some(methods),
                Err(e) => {
                    warn!("Method list query failed: {}", e);
                    None
                }
            };
        }
        ModuleState::from_snapshot(self.status(), self.last_error(), &session.snapshot(), methods)
    }

    /// Static description of the module
    pub fn about(&self) -> ModuleAbout {
        let general = &self.config.get().general;
        ModuleAbout {
            name: general.module_name.clone(),
            version: crate::VERSION.to_string(),
            description: general.description.clone(),
            model: general.model.clone(),
            instance_id: self.instance_id,
            started_at: self.started_at,
            actions: catalog(),
            admin_commands: ADMIN_COMMANDS.iter().map(|c| c.to_string()).collect(),
        }
    }

    /// Run a catalog action by name
    pub async fn run_action(&self, action: &str, vars: Value) -> StepResponse {
        if self.is_shut_down() {
            return StepResponse::failed(&Error::runtime("module is shut down"));
        }
        let _busy = InFlight::enter(&self.in_flight);
        let result = match ActionRequest::parse(action, vars) {
            Ok(request) => self.facade.run(request).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            warn!("Action {} failed: {}", action, e);
        }
        self.record(&result);
        StepResponse::from_result(&result)
    }

    /// Run an admin interrupt
    pub async fn interrupt(&self, kind: Interrupt) -> StepResponse {
        let result = self.facade.interrupt(kind).await;
        if let Err(e) = &result {
            warn!("Admin {} failed: {}", kind, e);
        }
        StepResponse::from_result(&result)
    }
}
