#![forbid(unsafe_code)]

//! Real-network fallback for unmatched traffic, plus the readiness signal
//! that lets event loops wait on virtual sockets.

#[cfg(unix)]
mod readiness;
mod tcp;

use std::fmt;
use std::io;
use std::sync::Arc;

use fm_config::PassthroughConfig;
use fm_protocol::Address;

#[cfg(unix)]
pub use readiness::ReadinessPipe;
pub use tcp::{TcpConnection, TcpConnector, connect_tcp};

/// One open connection to a real peer.
pub trait Connection: Send {
    /// Writes `request` and returns everything the peer answered.
    fn exchange(&mut self, request: &[u8]) -> io::Result<Vec<u8>>;
}

/// Opens connections; tests substitute their own to count or fake traffic.
pub trait Connector: Send + Sync {
    fn connect(
        &self,
        address: &Address,
        config: &PassthroughConfig,
    ) -> io::Result<Box<dyn Connection>>;
}

/// The real connection behind one virtual socket, opened on first use and
/// reused for later exchanges.
pub struct PassthroughTransport {
    address: Address,
    connector: Arc<dyn Connector>,
    config: PassthroughConfig,
    connection: Option<Box<dyn Connection>>,
}

impl PassthroughTransport {
    #[must_use]
    pub fn new(address: Address, connector: Arc<dyn Connector>, config: PassthroughConfig) -> Self {
        Self {
            address,
            connector,
            config,
            connection: None,
        }
    }

    #[must_use]
    pub fn address(&self) -> &Address {
        &self.address
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn send_and_receive(&mut self, request: &[u8]) -> io::Result<Vec<u8>> {
        tracing::debug!(address = %self.address, bytes = request.len(), "passthrough started");
        let mut connection = match self.connection.take() {
            Some(connection) => connection,
            None => self.connector.connect(&self.address, &self.config)?,
        };
        let result = connection.exchange(request);
        match &result {
            Ok(response) => {
                tracing::debug!(address = %self.address, bytes = response.len(), "passthrough finished");
                self.connection = Some(connection);
            }
            Err(err) => {
                tracing::debug!(address = %self.address, error = %err, "passthrough failed");
            }
        }
        result
    }

    /// Drops the real connection, if any.
    pub fn close(&mut self) {
        self.connection = None;
    }
}

impl fmt::Debug for PassthroughTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PassthroughTransport")
            .field("address", &self.address)
            .field("config", &self.config)
            .field("connected", &self.connection.is_some())
            .finish()
    }
}
