use std::fmt;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::Duration;

use fm_config::PassthroughConfig;
use fm_entry::Match;
use fm_protocol::Address;
use fm_registry::{Dispatch, EntryId};
#[cfg(unix)]
use fm_transport::ReadinessPipe;
use fm_transport::{Connector, PassthroughTransport};

use crate::tls::{CIPHER, PeerCertificate, TlsSession};
use crate::{Simulation, SimulationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Unconnected,
    Connected,
    Closed,
}

type ReadableCallback = Box<dyn FnMut(&Address) + Send>;

/// A socket whose peer is the simulation scope.
///
/// Every write is answered synchronously: by the first matching entry, by
/// the capture store, or by one bounded real exchange. Reads only ever
/// drain what the last write buffered.
pub struct VirtualSocket {
    simulation: Simulation,
    state: SocketState,
    address: Option<Address>,
    bound: Option<EntryId>,
    inbound: Vec<u8>,
    read_pos: usize,
    passthrough: Option<PassthroughTransport>,
    nonblocking: bool,
    read_timeout: Option<Duration>,
    tls: Option<TlsSession>,
    #[cfg(unix)]
    readiness: Option<ReadinessPipe>,
    on_readable: Option<ReadableCallback>,
}

impl VirtualSocket {
    pub(crate) fn new(simulation: Simulation) -> Self {
        Self {
            simulation,
            state: SocketState::Unconnected,
            address: None,
            bound: None,
            inbound: Vec::new(),
            read_pos: 0,
            passthrough: None,
            nonblocking: false,
            read_timeout: None,
            tls: None,
            #[cfg(unix)]
            readiness: None,
            on_readable: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> SocketState {
        self.state
    }

    #[must_use]
    pub fn peer_addr(&self) -> Option<&Address> {
        self.address.as_ref()
    }

    #[must_use]
    pub fn simulation(&self) -> &Simulation {
        &self.simulation
    }

    /// Unread bytes of the last response.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inbound.len() - self.read_pos
    }

    pub fn connect(&mut self, address: impl Into<Address>) -> Result<(), SimulationError> {
        match self.state {
            SocketState::Closed => return Err(SimulationError::Closed),
            SocketState::Connected => {
                return Err(SimulationError::AlreadyConnected(
                    self.address.clone().ok_or(SimulationError::NotConnected)?,
                ));
            }
            SocketState::Unconnected => {}
        }
        self.attach(address.into());
        Ok(())
    }

    fn attach(&mut self, address: Address) {
        self.simulation
            .lock()
            .registry
            .set_last_connected(address.clone());
        if self.address.as_ref() != Some(&address) {
            self.bound = None;
            self.passthrough = None;
        }
        self.address = Some(address);
        self.state = SocketState::Connected;
    }

    fn connected_address(&self) -> Result<Address, SimulationError> {
        match self.state {
            SocketState::Closed => Err(SimulationError::Closed),
            SocketState::Unconnected => Err(SimulationError::NotConnected),
            SocketState::Connected => self.address.clone().ok_or(SimulationError::NotConnected),
        }
    }

    /// Sends the whole payload and reports its length.
    pub fn send(&mut self, data: &[u8]) -> Result<usize, SimulationError> {
        self.send_all(data)?;
        Ok(data.len())
    }

    pub fn send_all(&mut self, data: &[u8]) -> Result<(), SimulationError> {
        let address = self.connected_address()?;
        self.exchange(&address, data)
    }

    /// Points the socket at `address` and sends.
    pub fn send_to(
        &mut self,
        address: impl Into<Address>,
        data: &[u8],
    ) -> Result<usize, SimulationError> {
        if self.state == SocketState::Closed {
            return Err(SimulationError::Closed);
        }
        self.attach(address.into());
        self.send(data)
    }

    fn exchange(&mut self, address: &Address, data: &[u8]) -> Result<(), SimulationError> {
        let mut scope = self.simulation.lock();
        if !scope.enabled {
            let connector = Arc::clone(&scope.connector);
            let config = scope.config.passthrough;
            drop(scope);
            let response = self.forward(address, connector, config, data)?;
            self.deliver(response);
            return Ok(());
        }

        if let Some(found) = scope.registry.resolve(address, data, self.bound) {
            if found.outcome == Match::Request {
                self.bound = Some(found.id);
            }
            let dispatched = scope.registry.dispatch(found.id, data);
            drop(scope);
            if let Dispatch::Reply(response) = dispatched? {
                self.deliver(response);
            }
            return Ok(());
        }
        self.bound = None;

        if !scope.config.policy.is_allowed(address) {
            tracing::warn!(%address, "strict mode denied real network access");
            return Err(SimulationError::UnmatchedStrictAccess {
                address: address.clone(),
                registered: scope.registry.describe(),
            });
        }

        let recorded = scope
            .store
            .as_ref()
            .and_then(|store| store.get_record(address, data))
            .map(|record| record.response.clone());
        if let Some(response) = recorded {
            drop(scope);
            self.deliver(response);
            return Ok(());
        }

        let recording = scope.store.is_some();
        let connector = Arc::clone(&scope.connector);
        let config = scope.config.passthrough;
        drop(scope);

        let response = self.forward(address, connector, config, data)?;
        if recording {
            let mut scope = self.simulation.lock();
            if let Some(store) = scope.store.as_mut() {
                store.put_record(address, data, &response)?;
            }
        }
        self.deliver(response);
        Ok(())
    }

    fn forward(
        &mut self,
        address: &Address,
        connector: Arc<dyn Connector>,
        config: PassthroughConfig,
        data: &[u8],
    ) -> Result<Vec<u8>, SimulationError> {
        let mut transport = match self.passthrough.take() {
            Some(transport) if transport.address() == address => transport,
            _ => PassthroughTransport::new(address.clone(), connector, config),
        };
        let result = transport.send_and_receive(data);
        self.passthrough = Some(transport);
        result.map_err(|source| SimulationError::Passthrough {
            address: address.clone(),
            source,
        })
    }

    // Replaces unread content and raises the readiness signal.
    fn deliver(&mut self, response: Vec<u8>) {
        self.inbound = response;
        self.read_pos = 0;
        #[cfg(unix)]
        if let Some(pipe) = self.readiness.as_mut() {
            if let Err(err) = pipe.notify() {
                tracing::debug!(error = %err, "readiness notify failed");
            }
        }
        if let (Some(callback), Some(address)) = (self.on_readable.as_mut(), self.address.as_ref()) {
            callback(address);
        }
    }

    /// Up to `max` buffered bytes. An empty buffer reads as end of stream on
    /// a blocking socket and as `WouldBlock` on a non-blocking one, or right
    /// after a TLS handshake that has not yet produced data.
    pub fn recv(&mut self, max: usize) -> Result<Vec<u8>, SimulationError> {
        match self.state {
            SocketState::Closed => return Err(SimulationError::Closed),
            SocketState::Unconnected => return Err(SimulationError::NotConnected),
            SocketState::Connected => {}
        }
        let available = &self.inbound[self.read_pos..];
        if !available.is_empty() {
            let n = available.len().min(max);
            let out = available[..n].to_vec();
            self.read_pos += n;
            if n > 0 {
                if let Some(tls) = self.tls.as_mut() {
                    tls.delivered_data = true;
                }
            }
            if self.pending() == 0 {
                self.drain_readiness();
            }
            return Ok(out);
        }
        let want_read = self.tls.as_ref().is_some_and(|tls| !tls.delivered_data);
        if want_read || self.nonblocking {
            return Err(SimulationError::WouldBlock);
        }
        Ok(Vec::new())
    }

    pub fn recv_into(&mut self, buf: &mut [u8]) -> Result<usize, SimulationError> {
        let data = self.recv(buf.len())?;
        buf[..data.len()].copy_from_slice(&data);
        Ok(data.len())
    }

    pub fn set_nonblocking(&mut self, nonblocking: bool) {
        self.nonblocking = nonblocking;
    }

    #[must_use]
    pub fn is_nonblocking(&self) -> bool {
        self.nonblocking
    }

    /// Stored for callers that query it; reads never wait.
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.read_timeout = timeout;
    }

    #[must_use]
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    // ── TLS shim ──

    /// Records a completed handshake. Traffic stays unencrypted.
    pub fn start_tls(&mut self, server_name: Option<&str>) -> Result<(), SimulationError> {
        if self.state == SocketState::Closed {
            return Err(SimulationError::Closed);
        }
        self.tls = Some(TlsSession::new(server_name));
        Ok(())
    }

    #[must_use]
    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    #[must_use]
    pub fn server_name(&self) -> Option<&str> {
        self.tls.as_ref().and_then(|tls| tls.server_name.as_deref())
    }

    /// Certificate for the connected host, or for the scope's last connected
    /// address when this socket never connected.
    pub fn peer_certificate(&self) -> Result<PeerCertificate, SimulationError> {
        let host = match &self.address {
            Some(address) => address.host().to_string(),
            None => self
                .simulation
                .lock()
                .registry
                .last_connected()
                .map(|address| address.host().to_string())
                .ok_or(SimulationError::NotConnected)?,
        };
        Ok(PeerCertificate::for_host(&host))
    }

    #[must_use]
    pub fn cipher(&self) -> Option<(&'static str, &'static str, &'static str)> {
        self.tls.as_ref().map(|_| CIPHER)
    }

    /// Leaves TLS mode; the socket keeps its connection and buffer.
    pub fn unwrap_tls(&mut self) {
        self.tls = None;
    }

    // ── readiness ──

    /// Pipe that turns readable whenever a response is buffered.
    #[cfg(unix)]
    pub fn readiness_pipe(&mut self) -> Result<&mut ReadinessPipe, SimulationError> {
        if self.state == SocketState::Closed {
            return Err(SimulationError::Closed);
        }
        let has_pending = self.pending() > 0;
        let pipe = match self.readiness.take() {
            Some(pipe) => pipe,
            None => {
                let mut pipe = ReadinessPipe::new().map_err(SimulationError::Readiness)?;
                if has_pending {
                    pipe.notify().map_err(SimulationError::Readiness)?;
                }
                pipe
            }
        };
        Ok(self.readiness.insert(pipe))
    }

    /// Calls `callback` with the peer address each time a response is
    /// buffered.
    pub fn on_readable<F>(&mut self, callback: F)
    where
        F: FnMut(&Address) + Send + 'static,
    {
        self.on_readable = Some(Box::new(callback));
    }

    fn drain_readiness(&mut self) {
        #[cfg(unix)]
        if let Some(pipe) = self.readiness.as_mut() {
            if let Err(err) = pipe.clear() {
                tracing::debug!(error = %err, "readiness drain failed");
            }
        }
    }

    /// Drops the buffer, the real connection and the readiness pipe.
    pub fn close(&mut self) {
        if self.state == SocketState::Closed {
            return;
        }
        self.state = SocketState::Closed;
        self.inbound.clear();
        self.read_pos = 0;
        self.bound = None;
        self.tls = None;
        if let Some(mut transport) = self.passthrough.take() {
            transport.close();
        }
        #[cfg(unix)]
        {
            self.readiness = None;
        }
        self.on_readable = None;
    }
}

impl Drop for VirtualSocket {
    fn drop(&mut self) {
        self.close();
    }
}

impl Read for VirtualSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.recv_into(buf).map_err(io::Error::from)
    }
}

impl Write for VirtualSocket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.send(buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl fmt::Debug for VirtualSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualSocket")
            .field("state", &self.state)
            .field("address", &self.address)
            .field("bound", &self.bound)
            .field("pending", &self.pending())
            .field("nonblocking", &self.nonblocking)
            .field("tls", &self.tls.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io::{self, Read, Write};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use fm_config::{EngineConfig, PassthroughConfig, StrictModePolicy};
    use fm_entry::{Entry, Reply};
    use fm_protocol::Address;
    use fm_transport::{Connection, Connector};

    use super::SocketState;
    use crate::{Simulation, SimulationError};

    #[derive(Default)]
    struct Counting {
        connects: AtomicUsize,
    }

    struct Upper;

    impl Connection for Upper {
        fn exchange(&mut self, request: &[u8]) -> io::Result<Vec<u8>> {
            Ok(request.to_ascii_uppercase())
        }
    }

    impl Connector for Counting {
        fn connect(
            &self,
            _address: &Address,
            _config: &PassthroughConfig,
        ) -> io::Result<Box<dyn Connection>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(Upper))
        }
    }

    fn enabled(config: EngineConfig) -> (Simulation, Arc<Counting>) {
        let counting = Arc::new(Counting::default());
        let simulation = Simulation::new(config).with_connector(counting.clone());
        simulation.enable().expect("enable");
        (simulation, counting)
    }

    #[test]
    fn registered_replies_cycle_and_then_read_as_eof() {
        let (simulation, counting) = enabled(EngineConfig::default());
        simulation
            .register_responses(("localhost", 8080), ["one", "two"])
            .expect("register");
        let mut socket = simulation.connect(("localhost", 8080)).expect("connect");

        for expected in ["one", "two", "two"] {
            socket.send_all(b"ping").expect("send");
            assert_eq!(socket.recv(1024).expect("recv"), expected.as_bytes());
            assert!(socket.recv(1024).expect("eof").is_empty());
        }
        assert_eq!(simulation.requests().len(), 3);
        assert_eq!(counting.connects.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn new_response_replaces_unread_bytes() {
        let (simulation, _) = enabled(EngineConfig::default());
        simulation
            .register_responses(("localhost", 1), ["first", "second"])
            .expect("register");
        let mut socket = simulation.connect(("localhost", 1)).expect("connect");
        socket.send_all(b"a").expect("send");
        assert_eq!(socket.recv(2).expect("partial"), b"fi");
        socket.send_all(b"b").expect("send");
        assert_eq!(socket.pending(), "second".len());
        assert_eq!(socket.recv(64).expect("recv"), b"second");
    }

    #[test]
    fn http_body_sent_separately_is_one_request() {
        let (simulation, _) = enabled(EngineConfig::default());
        simulation
            .register_http("POST", "http://api.local/upload", ["stored"])
            .expect("register");
        let mut socket = simulation.connect(("api.local", 80)).expect("connect");

        socket
            .send_all(b"POST /upload HTTP/1.1\r\nHost: api.local\r\nContent-Length: 5\r\n\r\n")
            .expect("headers");
        socket.send_all(b"hello").expect("body");

        let mut response = Vec::new();
        socket.read_to_end(&mut response).expect("read");
        assert!(response.starts_with(b"HTTP/1.1 200 OK\r\n"));
        assert!(response.ends_with(b"stored"));

        let requests = simulation.requests();
        assert_eq!(requests.len(), 1);
        let http = requests[0].as_http().expect("http request");
        assert_eq!(http.body(), b"hello");
        assert!(http.is_complete());
    }

    #[test]
    fn strict_mode_refuses_unmatched_traffic_and_lists_entries() {
        let config = EngineConfig::default().with_policy(StrictModePolicy::strict());
        let (simulation, counting) = enabled(config);
        simulation
            .register_response(("localhost", 1), "x")
            .expect("register");
        let mut socket = simulation.connect(("example.com", 80)).expect("connect");

        let err = socket.send_all(b"GET / HTTP/1.1\r\n\r\n").expect_err("strict");
        assert_eq!(err.reason_code(), "strict.unmatched_access");
        let message = err.to_string();
        assert!(message.contains("example.com:80"));
        assert!(message.contains("Entry(address=localhost:1)"));
        assert_eq!(counting.connects.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unmatched_traffic_passes_through_when_permitted() {
        let (simulation, counting) = enabled(EngineConfig::default());
        let mut socket = simulation.connect(("example.com", 80)).expect("connect");
        socket.send_all(b"abc").expect("send");
        socket.send_all(b"def").expect("send");
        assert_eq!(socket.recv(16).expect("recv"), b"DEF");
        assert_eq!(counting.connects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn disabled_scope_goes_straight_to_the_network() {
        let counting = Arc::new(Counting::default());
        let simulation = Simulation::default().with_connector(counting.clone());
        simulation
            .register_response(("localhost", 1), "mocked")
            .expect("register");
        let mut socket = simulation.connect(("localhost", 1)).expect("connect");
        socket.send_all(b"real").expect("send");
        assert_eq!(socket.recv(16).expect("recv"), b"REAL");
        assert_eq!(counting.connects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn scripted_errors_surface_through_write() {
        let (simulation, _) = enabled(EngineConfig::default());
        simulation
            .register_response(
                ("localhost", 2),
                Reply::error(io::ErrorKind::ConnectionReset, "reset by script"),
            )
            .expect("register");
        let mut socket = simulation.connect(("localhost", 2)).expect("connect");
        let err = socket.write(b"x").expect_err("scripted");
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
        assert_eq!(err.to_string(), "reset by script");
    }

    #[test]
    fn nonblocking_empty_read_would_block() {
        let (simulation, _) = enabled(EngineConfig::default());
        let mut socket = simulation.connect(("localhost", 3)).expect("connect");
        socket.set_nonblocking(true);
        assert!(matches!(socket.recv(8), Err(SimulationError::WouldBlock)));
        let err = socket.read(&mut [0_u8; 8]).expect_err("would block");
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn tls_handshake_wants_read_until_data_arrives() {
        let (simulation, _) = enabled(EngineConfig::default());
        simulation
            .register_response(("secure.local", 443), "hi")
            .expect("register");
        let mut socket = simulation.connect(("secure.local", 443)).expect("connect");
        socket.start_tls(Some("secure.local")).expect("tls");
        assert_eq!(socket.cipher(), Some(("ADH", "AES256", "SHA")));
        assert_eq!(socket.server_name(), Some("secure.local"));
        assert!(matches!(socket.recv(8), Err(SimulationError::WouldBlock)));

        socket.send_all(b"hello").expect("send");
        assert_eq!(socket.recv(8).expect("recv"), b"hi");
        assert!(socket.recv(8).expect("eof").is_empty());

        let cert = socket.peer_certificate().expect("cert");
        assert_eq!(cert.common_name(), Some("*.secure.local"));
    }

    #[test]
    fn closed_socket_rejects_io() {
        let (simulation, _) = enabled(EngineConfig::default());
        let mut socket = simulation.connect(("localhost", 4)).expect("connect");
        assert!(matches!(
            socket.connect(("localhost", 5)),
            Err(SimulationError::AlreadyConnected(_))
        ));
        socket.close();
        assert_eq!(socket.state(), SocketState::Closed);
        assert!(matches!(socket.send_all(b"x"), Err(SimulationError::Closed)));
        assert!(matches!(socket.recv(1), Err(SimulationError::Closed)));
    }

    #[test]
    fn unconnected_socket_cannot_send() {
        let (simulation, _) = enabled(EngineConfig::default());
        simulation
            .register_response(("localhost", 6), "y")
            .expect("register");
        let mut socket = simulation.socket();
        assert!(matches!(
            socket.send_all(b"x"),
            Err(SimulationError::NotConnected)
        ));
        assert_eq!(socket.send_to(("localhost", 6), b"x").expect("send_to"), 1);
        assert_eq!(socket.recv(8).expect("recv"), b"y");
        assert_eq!(socket.peer_addr(), Some(&Address::new("localhost", 6)));
    }

    #[test]
    fn readable_callback_fires_per_response() {
        let (simulation, _) = enabled(EngineConfig::default());
        simulation
            .register_response(("localhost", 7), "pong")
            .expect("register");
        let seen = Arc::new(AtomicUsize::new(0));
        let mut socket = simulation.connect(("localhost", 7)).expect("connect");
        let counter = seen.clone();
        socket.on_readable(move |address| {
            assert_eq!(address.port(), 7);
            counter.fetch_add(1, Ordering::SeqCst);
        });
        socket.send_all(b"ping").expect("send");
        socket.send_all(b"ping").expect("send");
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[cfg(unix)]
    #[test]
    fn readiness_pipe_tracks_buffered_bytes() {
        let (simulation, _) = enabled(EngineConfig::default());
        simulation
            .register_response(("localhost", 9), "ready")
            .expect("register");
        let mut socket = simulation.connect(("localhost", 9)).expect("connect");
        socket.readiness_pipe().expect("pipe");
        socket.send_all(b"go").expect("send");
        assert_eq!(socket.recv(64).expect("recv"), b"ready");
        let drained = socket.readiness_pipe().expect("pipe").clear().expect("clear");
        assert_eq!(drained, 0);
    }
}
