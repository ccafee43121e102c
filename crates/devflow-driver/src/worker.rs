/*!
 * The per-device command worker.
 *
 * Every device gets one worker task that owns its command queue. The loop
 * polls the queue, dispatches built-in control commands and transport
 * commands, runs response matching after each transport exchange, and
 * fires the periodic full status poll. Commands fail individually; only an
 * unresolvable device address stops a worker from running at all.
 */
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::command::{
    Command, CMD_INITIALIZE_CONNECTION, CMD_PAUSE_PROCESSING, CMD_SEND_WOL_REQUEST,
    CMD_TERMINATE_PROCESSING, CMD_UPDATE_STATUS_FULL,
};
use crate::device::{ActionInvoker, CommandSink, DeviceAdapter};
use crate::error::{Error, Result};
use crate::registry::{DefinitionRegistry, WorkerRegistry};
use crate::response::EffectContext;
use crate::subst::Substituter;
use crate::transport::RequestKind;
use crate::wol;
use devflow_core::config::WorkerDefaults;
use devflow_core::types::Id;

/// Lifecycle state of a device worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Resolving the address and opening resources
    Starting,
    /// Processing the command queue
    Running,
    /// Terminate received, finishing the remaining queued commands
    Draining,
    /// The worker task has exited
    Stopped,
}

/// Settings for one device worker
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Interval between full status polls; zero disables polling
    pub poll_interval: Duration,
    /// Delay between opening resources and the first dequeue
    pub startup_delay: Duration,
    /// Sleep applied on each empty-queue iteration
    pub idle_sleep: Duration,
    /// Number of idle iterations that sleep at half the interval after a
    /// command completes
    pub empty_queue_fast_cycles: u32,
    /// Action compiled and queued for the periodic status poll; polling is
    /// off when unset
    pub poll_action_id: Option<String>,
    /// Log failed commands with full diagnostic detail
    pub verbose_errors: bool,
}

impl WorkerConfig {
    /// Build a worker config from the framework-level worker defaults
    pub fn from_defaults(defaults: &WorkerDefaults) -> Self {
        Self {
            poll_interval: defaults.poll_interval(),
            startup_delay: defaults.startup_delay(),
            idle_sleep: defaults.idle_sleep(),
            empty_queue_fast_cycles: defaults.empty_queue_fast_cycles,
            poll_action_id: None,
            verbose_errors: false,
        }
    }

    /// Enable the periodic status poll with the given action
    pub fn with_poll_action<S: Into<String>>(mut self, action_id: S) -> Self {
        self.poll_action_id = Some(action_id.into());
        self
    }

    /// Enable verbose error logging
    pub fn with_verbose_errors(mut self) -> Self {
        self.verbose_errors = true;
        self
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::from_defaults(&WorkerDefaults::default())
    }
}

/// Idle-sleep pacing for the worker loop. For a bounded number of cycles
/// after a command completes, the queue is re-checked at half the normal
/// interval so bursts of related commands drain quickly.
#[derive(Debug)]
struct IdleThrottle {
    base: Duration,
    fast_cycles: u32,
    remaining: u32,
}

impl IdleThrottle {
    fn new(base: Duration, fast_cycles: u32) -> Self {
        Self {
            base,
            fast_cycles,
            remaining: 0,
        }
    }

    fn record_activity(&mut self) {
        self.remaining = self.fast_cycles;
    }

    fn next_interval(&mut self) -> Duration {
        if self.remaining > 0 {
            self.remaining -= 1;
            self.base / 2
        } else {
            self.base
        }
    }
}

/// Cloneable handle to a running worker: its command sink plus state
#[derive(Clone)]
pub struct WorkerHandle {
    device_id: Id,
    tx: UnboundedSender<Command>,
    state: Arc<RwLock<WorkerState>>,
}

impl WorkerHandle {
    /// The id of the device this worker serves
    pub fn device_id(&self) -> &Id {
        &self.device_id
    }

    /// The worker's current lifecycle state
    pub fn state(&self) -> WorkerState {
        self.state.read().map(|s| *s).unwrap_or(WorkerState::Stopped)
    }

    /// Queue the terminate command; the worker drains what is already
    /// queued, releases its resources and exits
    pub fn terminate(&self) -> Result<()> {
        self.enqueue(Command::new(CMD_TERMINATE_PROCESSING))
    }
}

impl CommandSink for WorkerHandle {
    fn enqueue(&self, command: Command) -> Result<()> {
        self.tx.send(command).map_err(|_| {
            Error::worker(format!(
                "worker for device {} is no longer accepting commands",
                self.device_id
            ))
        })
    }
}

/// Host-facing controller for one device: validates and compiles actions,
/// then queues the resulting commands on the device's worker
pub struct DeviceController {
    adapter: Arc<dyn DeviceAdapter>,
    device_type: String,
    definitions: Arc<DefinitionRegistry>,
    substituter: Arc<dyn Substituter>,
    handle: WorkerHandle,
}

impl DeviceController {
    /// Create a controller for a device whose worker is already running
    pub fn new<S: Into<String>>(
        adapter: Arc<dyn DeviceAdapter>,
        device_type: S,
        definitions: Arc<DefinitionRegistry>,
        substituter: Arc<dyn Substituter>,
        handle: WorkerHandle,
    ) -> Self {
        Self {
            adapter,
            device_type: device_type.into(),
            definitions,
            substituter,
            handle,
        }
    }

    /// The underlying worker handle
    pub fn handle(&self) -> &WorkerHandle {
        &self.handle
    }
}

#[async_trait]
impl ActionInvoker for DeviceController {
    async fn invoke_action(
        &self,
        action_id: &str,
        values: &HashMap<String, devflow_core::types::Value>,
    ) -> Result<()> {
        let action = self.definitions.action(&self.device_type, action_id)?;
        let state = self.adapter.state();
        let batch = action.compile(self.substituter.as_ref(), Some(state.as_ref()), values)?;

        info!(
            device = %self.adapter.id(),
            action = action_id,
            commands = batch.len(),
            "queueing action"
        );
        self.handle.enqueue_batch(batch)
    }
}

/// The worker task for one device's command queue
pub struct DeviceCommandWorker {
    adapter: Arc<dyn DeviceAdapter>,
    device_type: String,
    definitions: Arc<DefinitionRegistry>,
    substituter: Arc<dyn Substituter>,
    peers: Arc<WorkerRegistry>,
    config: WorkerConfig,
    rx: UnboundedReceiver<Command>,
    own_sink: WorkerHandle,
    state: Arc<RwLock<WorkerState>>,
    throttle: IdleThrottle,
    address: String,
    next_poll: Option<Instant>,
}

impl DeviceCommandWorker {
    /// Spawn a worker for a device. The handle is registered with the
    /// worker registry so response effects on other devices can reach this
    /// queue; it is unregistered again when the worker exits.
    pub fn spawn<S: Into<String>>(
        adapter: Arc<dyn DeviceAdapter>,
        device_type: S,
        definitions: Arc<DefinitionRegistry>,
        substituter: Arc<dyn Substituter>,
        peers: Arc<WorkerRegistry>,
        config: WorkerConfig,
    ) -> Result<(WorkerHandle, JoinHandle<()>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(RwLock::new(WorkerState::Starting));
        let handle = WorkerHandle {
            device_id: adapter.id().clone(),
            tx,
            state: state.clone(),
        };

        peers.register(adapter.id().clone(), Arc::new(handle.clone()))?;

        let throttle = IdleThrottle::new(config.idle_sleep, config.empty_queue_fast_cycles);
        let worker = Self {
            adapter,
            device_type: device_type.into(),
            definitions,
            substituter,
            peers,
            config,
            rx,
            own_sink: handle.clone(),
            state,
            throttle,
            address: String::new(),
            next_poll: None,
        };

        let join = tokio::spawn(worker.run());
        Ok((handle, join))
    }

    async fn run(mut self) {
        info!(device = %self.adapter.id(), "device worker starting");

        match self.adapter.address() {
            Ok(address) => self.address = address,
            Err(e) => {
                error!(
                    device = %self.adapter.id(),
                    error = %e,
                    "cannot resolve device address, worker not starting"
                );
                self.teardown().await;
                return;
            }
        }

        if let Err(e) = self.adapter.open_resources().await {
            error!(
                device = %self.adapter.id(),
                error = %e,
                "failed to open device resources, worker not starting"
            );
            self.teardown().await;
            return;
        }

        if !self.config.startup_delay.is_zero() {
            sleep(self.config.startup_delay).await;
        }

        self.set_state(WorkerState::Running);
        self.arm_poll();
        debug!(device = %self.adapter.id(), address = %self.address, "device worker running");

        loop {
            match self.rx.try_recv() {
                Ok(command) => {
                    if command.name == CMD_TERMINATE_PROCESSING {
                        break;
                    }
                    self.run_command(&command).await;
                    self.throttle.record_activity();
                    if !command.post_pause.is_zero() {
                        sleep(command.post_pause).await;
                    }
                }
                Err(TryRecvError::Empty) => {
                    if self.poll_due() {
                        if let Err(e) = self.queue_status_poll() {
                            warn!(
                                device = %self.adapter.id(),
                                error = %e,
                                "status poll could not be queued"
                            );
                        }
                        continue;
                    }
                    sleep(self.throttle.next_interval()).await;
                }
                Err(TryRecvError::Disconnected) => {
                    debug!(device = %self.adapter.id(), "command queue closed, stopping worker");
                    break;
                }
            }
        }

        self.drain().await;
        self.teardown().await;
    }

    /// Dispatch one command under its fault boundary
    async fn run_command(&mut self, command: &Command) {
        if let Err(e) = self.dispatch(command).await {
            if self.config.verbose_errors {
                error!(
                    device = %self.adapter.id(),
                    command = %command.name,
                    error = ?e,
                    "command failed"
                );
            } else {
                error!(
                    device = %self.adapter.id(),
                    command = %command.name,
                    error = %e,
                    "command failed"
                );
            }
        }
    }

    async fn dispatch(&mut self, command: &Command) -> Result<()> {
        match command.name.as_str() {
            // resources are already open; initialization just re-arms the
            // poll cycle and queues an immediate full status refresh
            CMD_INITIALIZE_CONNECTION => self.queue_status_poll(),
            CMD_PAUSE_PROCESSING => {
                let text = command.payload.as_text();
                let pause = if text.trim().is_empty() {
                    self.config.idle_sleep
                } else {
                    let seconds: f64 = text.trim().parse().map_err(|_| {
                        Error::action(format!("pause payload '{}' is not a number", text))
                    })?;
                    Duration::from_secs_f64(seconds)
                };
                debug!(device = %self.adapter.id(), seconds = pause.as_secs_f64(), "pausing worker");
                sleep(pause).await;
                Ok(())
            }
            CMD_UPDATE_STATUS_FULL => self.queue_status_poll(),
            CMD_SEND_WOL_REQUEST => wol::send_magic_packet(&command.payload.as_text()).await,
            name => match RequestKind::from_command_name(name) {
                Some(kind) => self.execute_transport(kind, command).await,
                None => self.adapter.handle_unknown_command(command).await,
            },
        }
    }

    async fn execute_transport(&mut self, kind: RequestKind, command: &Command) -> Result<()> {
        let transport = self.adapter.transport();
        let headers = self.adapter.custom_headers();

        match transport
            .execute(kind, &self.address, &headers, &command.payload)
            .await
        {
            Ok(response) => {
                debug!(
                    device = %self.adapter.id(),
                    kind = kind.as_str(),
                    status = ?response.status,
                    "transport request completed"
                );
                self.process_response(command, &response.text).await
            }
            Err(e) => {
                if self.config.verbose_errors {
                    error!(
                        device = %self.adapter.id(),
                        command = %command.name,
                        kind = kind.as_str(),
                        error = ?e,
                        "transport request failed"
                    );
                }
                self.adapter.handle_transport_error(command, &e).await;
                Ok(())
            }
        }
    }

    /// Run every matching response definition against a transport response
    async fn process_response(&self, command: &Command, response: &str) -> Result<()> {
        let definitions = self.definitions.responses(&self.device_type)?;
        if definitions.is_empty() {
            return Ok(());
        }

        let state = self.adapter.state();
        let ctx = EffectContext {
            substituter: self.substituter.as_ref(),
            device: self.adapter.as_ref(),
            sink: &self.own_sink,
            peers: Some(self.peers.as_ref()),
        };

        for definition in definitions {
            if definition.is_match(response, command, self.substituter.as_ref(), Some(state.as_ref()))
            {
                debug!(
                    device = %self.adapter.id(),
                    response_definition = %definition.id,
                    "response matched"
                );
                definition.execute_effects(response, command, &ctx).await;
            }
        }
        Ok(())
    }

    /// Compile the configured poll action and queue its commands, then
    /// re-arm the poll deadline
    fn queue_status_poll(&mut self) -> Result<()> {
        self.arm_poll();

        let action_id = match &self.config.poll_action_id {
            Some(id) => id.clone(),
            None => return Ok(()),
        };

        let action = self.definitions.action(&self.device_type, &action_id)?;
        let state = self.adapter.state();
        let batch = action.compile(
            self.substituter.as_ref(),
            Some(state.as_ref()),
            &HashMap::new(),
        )?;

        debug!(
            device = %self.adapter.id(),
            action = %action_id,
            commands = batch.len(),
            "queueing status poll"
        );
        self.own_sink.enqueue_batch(batch)
    }

    fn arm_poll(&mut self) {
        self.next_poll = if self.config.poll_action_id.is_some()
            && !self.config.poll_interval.is_zero()
        {
            Some(Instant::now() + self.config.poll_interval)
        } else {
            None
        };
    }

    fn poll_due(&self) -> bool {
        self.next_poll
            .map_or(false, |deadline| Instant::now() >= deadline)
    }

    /// Finish the commands that were already queued when terminate arrived
    async fn drain(&mut self) {
        self.set_state(WorkerState::Draining);
        while let Ok(command) = self.rx.try_recv() {
            if command.name == CMD_TERMINATE_PROCESSING {
                continue;
            }
            self.run_command(&command).await;
        }
    }

    async fn teardown(&mut self) {
        self.adapter.close_resources().await;
        if self.peers.unregister(self.adapter.id()).is_err() {
            debug!(device = %self.adapter.id(), "worker was not registered with the peer registry");
        }
        self.set_state(WorkerState::Stopped);
        info!(device = %self.adapter.id(), "device worker stopped");
    }

    fn set_state(&self, next: WorkerState) {
        if let Ok(mut state) = self.state.write() {
            *state = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionDefinition, CommandTemplate};
    use crate::command::CommandPayload;
    use crate::response::{ResponseDefinition, ResponseEffect};
    use crate::state::{MemoryStateStore, StateStore};
    use crate::subst::TokenSubstituter;
    use crate::transport::{Transport, TransportError, TransportResponse};
    use devflow_core::types::Value;
    use std::sync::Mutex;

    struct RecordingTransport {
        requests: Mutex<Vec<(RequestKind, String)>>,
        response_text: String,
    }

    impl RecordingTransport {
        fn new() -> Self {
            Self::with_response("")
        }

        fn with_response<S: Into<String>>(text: S) -> Self {
            Self {
                requests: Mutex::new(Vec::new()),
                response_text: text.into(),
            }
        }

        fn requests(&self) -> Vec<(RequestKind, String)> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn execute(
            &self,
            kind: RequestKind,
            _address: &str,
            _headers: &HashMap<String, String>,
            payload: &CommandPayload,
        ) -> std::result::Result<TransportResponse, TransportError> {
            self.requests.lock().unwrap().push((kind, payload.as_text()));
            Ok(TransportResponse::new(200, self.response_text.clone()))
        }
    }

    struct TestAdapter {
        id: Id,
        state: Arc<MemoryStateStore>,
        transport: Arc<RecordingTransport>,
        fail_address: bool,
        unknown_commands: Mutex<Vec<String>>,
        open_calls: Mutex<u32>,
        transport_errors: Mutex<Vec<String>>,
    }

    impl TestAdapter {
        fn new(transport: Arc<RecordingTransport>) -> Self {
            Self {
                id: Id::from("receiver-1"),
                state: Arc::new(MemoryStateStore::new()),
                transport,
                fail_address: false,
                unknown_commands: Mutex::new(Vec::new()),
                open_calls: Mutex::new(0),
                transport_errors: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl DeviceAdapter for TestAdapter {
        fn id(&self) -> &Id {
            &self.id
        }

        fn address(&self) -> Result<String> {
            if self.fail_address {
                Err(Error::worker("no address configured"))
            } else {
                Ok("192.168.1.10".to_string())
            }
        }

        fn state(&self) -> Arc<dyn StateStore> {
            self.state.clone()
        }

        fn transport(&self) -> Arc<dyn Transport> {
            self.transport.clone()
        }

        async fn open_resources(&self) -> Result<()> {
            *self.open_calls.lock().unwrap() += 1;
            Ok(())
        }

        async fn handle_unknown_command(&self, command: &Command) -> Result<()> {
            self.unknown_commands.lock().unwrap().push(command.name.clone());
            Ok(())
        }

        async fn handle_transport_error(&self, command: &Command, error: &TransportError) {
            self.transport_errors
                .lock()
                .unwrap()
                .push(format!("{}: {}", command.name, error));
        }
    }

    fn fast_config() -> WorkerConfig {
        WorkerConfig {
            poll_interval: Duration::ZERO,
            startup_delay: Duration::ZERO,
            idle_sleep: Duration::from_millis(10),
            empty_queue_fast_cycles: 4,
            poll_action_id: None,
            verbose_errors: false,
        }
    }

    fn spawn_worker(
        adapter: Arc<dyn DeviceAdapter>,
        definitions: Arc<DefinitionRegistry>,
        config: WorkerConfig,
    ) -> (WorkerHandle, JoinHandle<()>, Arc<WorkerRegistry>) {
        let peers = Arc::new(WorkerRegistry::new());
        let (handle, join) = DeviceCommandWorker::spawn(
            adapter,
            "receiver",
            definitions,
            Arc::new(TokenSubstituter::new()),
            peers.clone(),
            config,
        )
        .unwrap();
        (handle, join, peers)
    }

    #[test]
    fn test_idle_throttle_halves_for_bounded_cycles() {
        let base = Duration::from_millis(100);
        let mut throttle = IdleThrottle::new(base, 3);

        assert_eq!(throttle.next_interval(), base);

        throttle.record_activity();
        assert_eq!(throttle.next_interval(), base / 2);
        assert_eq!(throttle.next_interval(), base / 2);
        assert_eq!(throttle.next_interval(), base / 2);
        assert_eq!(throttle.next_interval(), base);
    }

    #[test]
    fn test_idle_throttle_resets_on_activity() {
        let base = Duration::from_millis(100);
        let mut throttle = IdleThrottle::new(base, 2);

        throttle.record_activity();
        assert_eq!(throttle.next_interval(), base / 2);
        throttle.record_activity();
        assert_eq!(throttle.next_interval(), base / 2);
        assert_eq!(throttle.next_interval(), base / 2);
        assert_eq!(throttle.next_interval(), base);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminate_drains_queued_commands_in_order() {
        let transport = Arc::new(RecordingTransport::new());
        let adapter = Arc::new(TestAdapter::new(transport.clone()));
        let (handle, join, _peers) =
            spawn_worker(adapter, Arc::new(DefinitionRegistry::new()), fast_config());

        handle.terminate().unwrap();
        handle
            .enqueue(Command::new("HTTP_GET").with_payload("/first"))
            .unwrap();
        handle
            .enqueue(Command::new("HTTP_GET").with_payload("/second"))
            .unwrap();

        join.await.unwrap();

        let requests = transport.requests();
        let payloads: Vec<&str> = requests.iter().map(|(_, p)| p.as_str()).collect();
        assert_eq!(payloads, ["/first", "/second"]);
        assert_eq!(handle.state(), WorkerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_commands_run_in_queue_order() {
        let transport = Arc::new(RecordingTransport::new());
        let adapter = Arc::new(TestAdapter::new(transport.clone()));
        let (handle, join, _peers) =
            spawn_worker(adapter, Arc::new(DefinitionRegistry::new()), fast_config());

        handle
            .enqueue(Command::new("HTTP_GET").with_payload("/a"))
            .unwrap();
        handle
            .enqueue(
                Command::new("HTTP_PUT")
                    .with_payload("/b")
                    .with_post_pause(Duration::from_millis(50)),
            )
            .unwrap();
        handle
            .enqueue(Command::new("HTTP_GET").with_payload("/c"))
            .unwrap();
        handle.terminate().unwrap();

        join.await.unwrap();

        let requests = transport.requests();
        assert_eq!(
            requests,
            vec![
                (RequestKind::Get, "/a".to_string()),
                (RequestKind::Put, "/b".to_string()),
                (RequestKind::Get, "/c".to_string()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_command_goes_to_adapter() {
        let transport = Arc::new(RecordingTransport::new());
        let adapter = Arc::new(TestAdapter::new(transport.clone()));
        let (handle, join, _peers) = spawn_worker(
            adapter.clone(),
            Arc::new(DefinitionRegistry::new()),
            fast_config(),
        );

        handle.enqueue(Command::new("CUSTOM_THING")).unwrap();
        handle.terminate().unwrap();
        join.await.unwrap();

        assert_eq!(*adapter.unknown_commands.lock().unwrap(), ["CUSTOM_THING"]);
        assert!(transport.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_connection_does_not_reopen_resources() {
        let definitions = Arc::new(DefinitionRegistry::new());
        definitions
            .register_action(
                "receiver",
                ActionDefinition::new("poll-status")
                    .add_command(CommandTemplate::new("HTTP_GET", "/status")),
            )
            .unwrap();

        let transport = Arc::new(RecordingTransport::new());
        let adapter = Arc::new(TestAdapter::new(transport.clone()));
        let mut config = fast_config();
        config.poll_action_id = Some("poll-status".to_string());

        let (handle, join, _peers) = spawn_worker(adapter.clone(), definitions, config);

        handle
            .enqueue(Command::new(CMD_INITIALIZE_CONNECTION))
            .unwrap();
        handle.terminate().unwrap();
        join.await.unwrap();

        assert_eq!(*adapter.open_calls.lock().unwrap(), 1);
        // initialization still queues the immediate status refresh
        assert_eq!(
            transport.requests(),
            vec![(RequestKind::Get, "/status".to_string())]
        );
    }

    struct FailingTransport;

    #[async_trait]
    impl Transport for FailingTransport {
        async fn execute(
            &self,
            _kind: RequestKind,
            _address: &str,
            _headers: &HashMap<String, String>,
            _payload: &CommandPayload,
        ) -> std::result::Result<TransportResponse, TransportError> {
            Err(TransportError::Connect("connection refused".to_string()))
        }
    }

    struct FailingTransportAdapter {
        inner: TestAdapter,
    }

    #[async_trait]
    impl DeviceAdapter for FailingTransportAdapter {
        fn id(&self) -> &Id {
            self.inner.id()
        }

        fn address(&self) -> Result<String> {
            self.inner.address()
        }

        fn state(&self) -> Arc<dyn StateStore> {
            self.inner.state()
        }

        fn transport(&self) -> Arc<dyn Transport> {
            Arc::new(FailingTransport)
        }

        async fn handle_transport_error(&self, command: &Command, error: &TransportError) {
            self.inner.handle_transport_error(command, error).await;
        }

        async fn handle_unknown_command(&self, command: &Command) -> Result<()> {
            self.inner.handle_unknown_command(command).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_is_isolated_per_command() {
        let recording = Arc::new(RecordingTransport::new());
        let adapter = Arc::new(FailingTransportAdapter {
            inner: TestAdapter::new(recording),
        });
        let mut config = fast_config();
        config.verbose_errors = true;

        let (handle, join, _peers) = spawn_worker(
            adapter.clone(),
            Arc::new(DefinitionRegistry::new()),
            config,
        );

        handle
            .enqueue(Command::new("HTTP_GET").with_payload("/a"))
            .unwrap();
        handle.enqueue(Command::new("CUSTOM_AFTER_FAILURE")).unwrap();
        handle.terminate().unwrap();
        join.await.unwrap();

        assert_eq!(adapter.inner.transport_errors.lock().unwrap().len(), 1);
        assert_eq!(
            *adapter.inner.unknown_commands.lock().unwrap(),
            ["CUSTOM_AFTER_FAILURE"]
        );
        assert_eq!(handle.state(), WorkerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresolvable_address_is_fatal() {
        let transport = Arc::new(RecordingTransport::new());
        let mut adapter = TestAdapter::new(transport.clone());
        adapter.fail_address = true;
        let (handle, join, peers) = spawn_worker(
            Arc::new(adapter),
            Arc::new(DefinitionRegistry::new()),
            fast_config(),
        );

        join.await.unwrap();

        assert_eq!(handle.state(), WorkerState::Stopped);
        assert!(transport.requests().is_empty());
        assert!(peers.sink(handle.device_id()).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_poll_fires_on_interval() {
        let definitions = Arc::new(DefinitionRegistry::new());
        definitions
            .register_action(
                "receiver",
                ActionDefinition::new("poll-status")
                    .add_command(CommandTemplate::new("HTTP_GET", "/status")),
            )
            .unwrap();

        let transport = Arc::new(RecordingTransport::new());
        let adapter = Arc::new(TestAdapter::new(transport.clone()));
        let mut config = fast_config();
        config.poll_interval = Duration::from_secs(1);
        config.poll_action_id = Some("poll-status".to_string());

        let (handle, join, _peers) = spawn_worker(adapter, definitions, config);

        tokio::time::sleep(Duration::from_millis(2500)).await;
        handle.terminate().unwrap();
        join.await.unwrap();

        let status_polls = transport
            .requests()
            .iter()
            .filter(|(_, payload)| payload == "/status")
            .count();
        assert!(status_polls >= 2, "expected repeated polls, got {}", status_polls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_response_effect_updates_state() {
        let definitions = Arc::new(DefinitionRegistry::new());
        definitions
            .register_response(
                "receiver",
                ResponseDefinition::new("volume")
                    .with_pattern("volume=(\\d+)")
                    .unwrap()
                    .add_effect(ResponseEffect::update_state("raw", "%cp:response%")),
            )
            .unwrap();

        let transport = Arc::new(RecordingTransport::with_response("volume=42"));
        let adapter = Arc::new(TestAdapter::new(transport.clone()));
        let (handle, join, _peers) = spawn_worker(adapter.clone(), definitions, fast_config());

        handle
            .enqueue(Command::new("HTTP_GET").with_payload("/status"))
            .unwrap();
        handle.terminate().unwrap();
        join.await.unwrap();

        assert_eq!(
            adapter.state.get("raw"),
            Some(Value::String("volume=42".to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_after_stop_fails() {
        let transport = Arc::new(RecordingTransport::new());
        let adapter = Arc::new(TestAdapter::new(transport));
        let (handle, join, _peers) =
            spawn_worker(adapter, Arc::new(DefinitionRegistry::new()), fast_config());

        handle.terminate().unwrap();
        join.await.unwrap();

        assert!(handle.enqueue(Command::new("HTTP_GET")).is_err());
    }

    #[tokio::test]
    async fn test_controller_rejects_invalid_action_values() {
        use crate::param::{ParamDefinition, ParamType};

        let definitions = Arc::new(DefinitionRegistry::new());
        definitions
            .register_action(
                "receiver",
                ActionDefinition::new("set-volume")
                    .add_parameter(
                        ParamDefinition::new("level", ParamType::Integer)
                            .required()
                            .with_range(0.0, 100.0),
                    )
                    .add_command(CommandTemplate::new("HTTP_GET", "/volume?level=%ap:level%")),
            )
            .unwrap();

        let transport = Arc::new(RecordingTransport::new());
        let adapter = Arc::new(TestAdapter::new(transport.clone()));
        let (handle, join, _peers) =
            spawn_worker(adapter.clone(), definitions.clone(), fast_config());

        let controller = DeviceController::new(
            adapter,
            "receiver",
            definitions,
            Arc::new(TokenSubstituter::new()),
            handle.clone(),
        );

        let mut values = HashMap::new();
        values.insert("level".to_string(), Value::from("200"));
        assert!(matches!(
            controller.invoke_action("set-volume", &values).await,
            Err(Error::Validation(_))
        ));

        values.insert("level".to_string(), Value::from("20"));
        controller.invoke_action("set-volume", &values).await.unwrap();

        handle.terminate().unwrap();
        join.await.unwrap();

        assert_eq!(
            transport.requests(),
            vec![(RequestKind::Get, "/volume?level=20".to_string())]
        );
    }
}
