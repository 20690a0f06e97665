/*!
 * Scriptable in-memory vendor client.
 *
 * Records every command, answers status queries from a script by invoking
 * the registered handler, and can be told to reject commands. Query replies
 * are delivered synchronously unless a delivery delay is set, in which case
 * they arrive later from a spawned task.
 */
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::remote::{Command, ConnectOptions, Notification, NotificationHandler, RemoteControl};
use crate::status::CONNECTED_CODE;

struct MockState {
    handler: Option<Arc<dyn NotificationHandler>>,
    commands: Vec<Command>,
    connections: Vec<ConnectOptions>,
    disconnects: usize,
    accept_connect: bool,
    rejected: HashSet<&'static str>,
    response: String,
    analysis_script: VecDeque<i32>,
    analysis_after_script: Option<i32>,
    plasma_code: Option<i32>,
    instrument_code: Option<i32>,
    methods: Vec<String>,
    instrument_names: HashMap<i32, String>,
    delivery_delay: Option<Duration>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            handler: None,
            commands: Vec::new(),
            connections: Vec::new(),
            disconnects: 0,
            accept_connect: true,
            rejected: HashSet::new(),
            response: String::new(),
            analysis_script: VecDeque::new(),
            analysis_after_script: None,
            plasma_code: None,
            instrument_code: None,
            methods: Vec::new(),
            instrument_names: HashMap::new(),
            delivery_delay: None,
        }
    }
}

/// In-memory [`RemoteControl`] for tests
#[derive(Default)]
pub struct MockRemoteControl {
    state: Mutex<MockState>,
}

impl fmt::Debug for MockRemoteControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("MockRemoteControl")
            .field("commands", &state.commands)
            .field("disconnects", &state.disconnects)
            .finish()
    }
}

impl MockRemoteControl {
    /// Create a mock that accepts everything
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handler(&self) -> Option<Arc<dyn NotificationHandler>> {
        self.lock().handler.clone()
    }

    /// Make the connection handshake fail
    pub fn reject_connect(&self) {
        self.lock().accept_connect = false;
    }

    /// Make every command with this vendor name fail
    pub fn reject(&self, command_name: &'static str) {
        self.lock().rejected.insert(command_name);
    }

    /// Queue analysis-status codes answered, one per `GetAnalysisStatus`
    pub fn script_analysis<I: IntoIterator<Item = i32>>(&self, codes: I) {
        self.lock().analysis_script.extend(codes);
    }

    /// Code answered to `GetAnalysisStatus` once the script is exhausted
    pub fn analysis_after_script(&self, code: i32) {
        self.lock().analysis_after_script = Some(code);
    }

    /// Code answered to `GetPlasmaStatus`
    pub fn set_plasma_status(&self, code: i32) {
        self.lock().plasma_code = Some(code);
    }

    /// Code answered to `GetInstrumentStatus`
    pub fn set_instrument_status(&self, code: i32) {
        self.lock().instrument_code = Some(code);
    }

    /// Methods listed by `GetMethodsList`
    pub fn set_methods<I: IntoIterator<Item = S>, S: Into<String>>(&self, methods: I) {
        self.lock().methods = methods.into_iter().map(Into::into).collect();
    }

    /// Names returned from `instrument_status_names`
    pub fn set_instrument_names(&self, names: HashMap<i32, String>) {
        self.lock().instrument_names = names;
    }

    /// Deliver query replies from a spawned task after `delay`
    pub fn set_delivery_delay(&self, delay: Duration) {
        self.lock().delivery_delay = Some(delay);
    }

    /// Deliver a notification through the registered handler
    pub fn notify(&self, notification: Notification) {
        if let Some(handler) = self.handler() {
            handler.dispatch(&notification);
        }
    }

    /// Commands executed so far, in order
    pub fn commands(&self) -> Vec<Command> {
        self.lock().commands.clone()
    }

    /// Vendor names of the commands executed so far
    pub fn command_names(&self) -> Vec<&'static str> {
        self.lock().commands.iter().map(Command::name).collect()
    }

    /// Forget recorded commands
    pub fn clear_commands(&self) {
        self.lock().commands.clear();
    }

    /// Options of every connect call
    pub fn connections(&self) -> Vec<ConnectOptions> {
        self.lock().connections.clone()
    }

    /// Number of disconnect calls
    pub fn disconnects(&self) -> usize {
        self.lock().disconnects
    }

    /// True once a handler has been registered
    pub fn has_handler(&self) -> bool {
        self.lock().handler.is_some()
    }
}

#[async_trait]
impl RemoteControl for MockRemoteControl {
    fn register_handler(&self, handler: Arc<dyn NotificationHandler>) {
        self.lock().handler = Some(handler);
    }

    fn instrument_status_names(&self) -> HashMap<i32, String> {
        self.lock().instrument_names.clone()
    }

    async fn connect(&self, options: &ConnectOptions) -> bool {
        let accepted = {
            let mut state = self.lock();
            state.connections.push(options.clone());
            state.response = if state.accept_connect {
                format!("Connected to {}", options.server_address)
            } else {
                format!("Unable to reach {}", options.server_address)
            };
            state.accept_connect
        };
        if accepted {
            self.notify(Notification::ConnectionStatus(CONNECTED_CODE));
        }
        accepted
    }

    async fn disconnect(&self) -> bool {
        {
            let mut state = self.lock();
            state.disconnects += 1;
            state.response = "Disconnected".to_string();
        }
        self.notify(Notification::ConnectionStatus(0));
        true
    }

    async fn execute(&self, command: &Command) -> bool {
        let (accepted, reply, delay) = {
            let mut state = self.lock();
            state.commands.push(command.clone());

            if state.rejected.contains(command.name()) {
                state.response = format!("{} failed", command.name());
                return false;
            }

            state.response = format!("{} OK", command.name());
            let reply = match command {
                Command::GetAnalysisStatus => state
                    .analysis_script
                    .pop_front()
                    .or(state.analysis_after_script)
                    .map(Notification::AnalysisStatus),
                Command::GetPlasmaStatus => state.plasma_code.map(Notification::PlasmaStatus),
                Command::GetInstrumentStatus => {
                    state.instrument_code.map(Notification::InstrumentStatus)
                }
                Command::GetMethodsList => {
                    state.response = state.methods.join("\n");
                    None
                }
                _ => None,
            };
            (true, reply, state.delivery_delay)
        };

        match (reply, delay) {
            (Some(notification), Some(delay)) => {
                let handler = self.handler();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Some(handler) = handler {
                        handler.dispatch(&notification);
                    }
                });
            }
            (Some(notification), None) => self.notify(notification),
            (None, _) => {}
        }
        accepted
    }

    async fn response(&self) -> String {
        self.lock().response.clone()
    }
}
