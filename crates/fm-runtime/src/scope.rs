use std::fmt;
use std::ops::Deref;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use fm_config::EngineConfig;
use fm_entry::{Entry, Reply, Request};
use fm_protocol::http::HttpResponseBuilder;
use fm_protocol::{Address, TextEncoding};
use fm_record::{Record, RecordStore};
use fm_registry::{EntryId, Registry};
use fm_transport::{Connector, TcpConnector};

use crate::SimulationError;
use crate::socket::VirtualSocket;

static SCOPE_COUNTER: AtomicU64 = AtomicU64::new(1);

pub(crate) struct ScopeState {
    pub(crate) config: EngineConfig,
    pub(crate) enabled: bool,
    pub(crate) namespace: String,
    pub(crate) registry: Registry,
    pub(crate) store: Option<RecordStore>,
    pub(crate) connector: Arc<dyn Connector>,
}

/// Callbacks a test fixture may implement around an enabled scope.
pub trait ScopeHooks {
    fn on_scope_enter(&mut self, _simulation: &Simulation) {}
    fn on_scope_exit(&mut self, _simulation: &Simulation) {}
}

impl ScopeHooks for () {}

/// A simulation scope: the registry, request history, capture store and
/// policy shared by every virtual socket it creates.
///
/// Clones share the same scope.
#[derive(Clone)]
pub struct Simulation {
    state: Arc<Mutex<ScopeState>>,
}

impl Simulation {
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        let namespace = config.namespace.clone().unwrap_or_else(|| {
            format!("scope-{}", SCOPE_COUNTER.fetch_add(1, Ordering::Relaxed))
        });
        Self {
            state: Arc::new(Mutex::new(ScopeState {
                config,
                enabled: false,
                namespace,
                registry: Registry::new(),
                store: None,
                connector: Arc::new(TcpConnector),
            })),
        }
    }

    /// Replaces the connector used for real exchanges.
    #[must_use]
    pub fn with_connector(self, connector: Arc<dyn Connector>) -> Self {
        self.lock().connector = connector;
        self
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ScopeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts intercepting. Attaches the capture store when a recording
    /// directory is configured.
    pub fn enable(&self) -> Result<(), SimulationError> {
        let mut state = self.lock();
        state.config.validate()?;
        let store = match &state.config.recording_dir {
            Some(dir) => Some(RecordStore::open(
                dir.clone(),
                state.namespace.clone(),
                state.config.encoding,
            )?),
            None => None,
        };
        state.store = store;
        state.enabled = true;
        tracing::debug!(namespace = %state.namespace, recording = state.store.is_some(), "scope entered");
        Ok(())
    }

    /// Stops intercepting and forgets every entry, request and capture
    /// handle.
    pub fn disable(&self) {
        let mut state = self.lock();
        state.enabled = false;
        state.registry.reset();
        state.store = None;
        tracing::debug!(namespace = %state.namespace, "scope exited");
    }

    /// Forgets entries and requests; an attached capture store stays.
    pub fn reset(&self) {
        self.lock().registry.reset();
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.lock().enabled
    }

    #[must_use]
    pub fn namespace(&self) -> String {
        self.lock().namespace.clone()
    }

    #[must_use]
    pub fn recording_dir(&self) -> Option<PathBuf> {
        self.lock().config.recording_dir.clone()
    }

    #[must_use]
    pub fn encoding(&self) -> TextEncoding {
        self.lock().config.encoding
    }

    #[must_use]
    pub fn config(&self) -> EngineConfig {
        self.lock().config.clone()
    }

    /// An HTTP response builder preset with the scope's encoding.
    #[must_use]
    pub fn http_response(&self, status: u16) -> HttpResponseBuilder {
        HttpResponseBuilder::new(status).encoding(self.encoding())
    }

    pub fn register(&self, entry: Entry) -> Result<EntryId, SimulationError> {
        let mut state = self.lock();
        let entry = entry.with_encoding(state.config.encoding)?;
        Ok(state.registry.register(entry))
    }

    pub fn register_response(
        &self,
        address: impl Into<Address>,
        reply: impl Into<Reply>,
    ) -> Result<EntryId, SimulationError> {
        self.register(Entry::bytes(address, vec![reply.into()]))
    }

    pub fn register_responses<I, R>(
        &self,
        address: impl Into<Address>,
        replies: I,
    ) -> Result<EntryId, SimulationError>
    where
        I: IntoIterator<Item = R>,
        R: Into<Reply>,
    {
        self.register(Entry::bytes(
            address,
            replies.into_iter().map(Into::into).collect(),
        ))
    }

    /// Registers an HTTP entry that compares the query string exactly.
    pub fn register_http<I, R>(
        &self,
        method: &str,
        uri: &str,
        replies: I,
    ) -> Result<EntryId, SimulationError>
    where
        I: IntoIterator<Item = R>,
        R: Into<Reply>,
    {
        self.register(Entry::http(
            method,
            uri,
            replies.into_iter().map(Into::into).collect(),
        )?)
    }

    /// Registers a RESP entry; `None` means `localhost:6379`.
    pub fn register_resp<I, R>(
        &self,
        address: Option<Address>,
        command: &str,
        replies: I,
    ) -> Result<EntryId, SimulationError>
    where
        I: IntoIterator<Item = R>,
        R: Into<Reply>,
    {
        self.register(Entry::resp(
            address,
            command,
            replies.into_iter().map(Into::into).collect(),
        )?)
    }

    /// Whether the entry has served at least one reply.
    #[must_use]
    pub fn is_served(&self, id: EntryId) -> bool {
        self.lock()
            .registry
            .entry(id)
            .is_some_and(Entry::is_served)
    }

    #[must_use]
    pub fn socket(&self) -> VirtualSocket {
        VirtualSocket::new(self.clone())
    }

    pub fn connect(&self, address: impl Into<Address>) -> Result<VirtualSocket, SimulationError> {
        let mut socket = self.socket();
        socket.connect(address)?;
        Ok(socket)
    }

    #[must_use]
    pub fn last_request(&self) -> Option<Request> {
        self.lock().registry.last_request().cloned()
    }

    #[must_use]
    pub fn requests(&self) -> Vec<Request> {
        self.lock().registry.history().all().to_vec()
    }

    #[must_use]
    pub fn has_requests(&self) -> bool {
        !self.lock().registry.history().is_empty()
    }

    pub fn remove_last_request(&self) -> Option<Request> {
        self.lock().registry.history_mut().remove_last()
    }

    /// Fails when any registered entry never served a reply.
    pub fn assert_fail_if_entries_not_served(&self) -> Result<(), SimulationError> {
        self.lock().registry.assert_all_served()?;
        Ok(())
    }

    /// Captured exchanges for `address` in the attached store.
    #[must_use]
    pub fn records(&self, address: &Address) -> Vec<Record> {
        self.lock()
            .store
            .as_ref()
            .map(|store| store.records(address).cloned().collect())
            .unwrap_or_default()
    }

    /// Enables the scope and returns a guard that exits it on drop, running
    /// `hooks` on both edges.
    pub fn enter<'h>(
        &self,
        mut hooks: Option<&'h mut dyn ScopeHooks>,
    ) -> Result<ScopeGuard<'h>, SimulationError> {
        self.enable()?;
        if let Some(hooks) = hooks.as_deref_mut() {
            hooks.on_scope_enter(self);
        }
        Ok(ScopeGuard {
            simulation: self.clone(),
            hooks,
        })
    }

    /// Runs `body` inside a fresh enabled scope built from `config`.
    pub fn scoped<T>(
        config: EngineConfig,
        hooks: &mut dyn ScopeHooks,
        body: impl FnOnce(&Simulation) -> T,
    ) -> Result<T, SimulationError> {
        let simulation = Self::new(config);
        let guard = simulation.enter(Some(hooks))?;
        Ok(body(&guard))
    }
}

impl Default for Simulation {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl fmt::Debug for Simulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Simulation")
            .field("namespace", &state.namespace)
            .field("enabled", &state.enabled)
            .field("entries", &state.registry.len())
            .field("requests", &state.registry.history().len())
            .field("recording", &state.store.is_some())
            .finish()
    }
}

/// Keeps a scope enabled; dropping it runs the exit hook, then disables.
pub struct ScopeGuard<'h> {
    simulation: Simulation,
    hooks: Option<&'h mut dyn ScopeHooks>,
}

impl ScopeGuard<'_> {
    #[must_use]
    pub fn simulation(&self) -> &Simulation {
        &self.simulation
    }
}

impl Deref for ScopeGuard<'_> {
    type Target = Simulation;

    fn deref(&self) -> &Simulation {
        &self.simulation
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        if let Some(hooks) = self.hooks.as_deref_mut() {
            hooks.on_scope_exit(&self.simulation);
        }
        self.simulation.disable();
    }
}
