use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use fm_protocol::Address;
use fm_transport::connect_tcp;

use crate::Simulation;
use crate::socket::VirtualSocket;

/// Where client code gets its byte streams from. Production code holds a
/// [`TcpDialer`]; tests hand it a [`Simulation`] instead.
pub trait Dialer {
    type Stream: Read + Write;

    fn dial(&self, address: &Address) -> io::Result<Self::Stream>;
}

impl Dialer for Simulation {
    type Stream = VirtualSocket;

    fn dial(&self, address: &Address) -> io::Result<VirtualSocket> {
        self.connect(address.clone()).map_err(io::Error::from)
    }
}

/// Dials real TCP connections.
#[derive(Debug, Clone, Copy)]
pub struct TcpDialer {
    pub connect_timeout: Duration,
}

impl Default for TcpDialer {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl Dialer for TcpDialer {
    type Stream = TcpStream;

    fn dial(&self, address: &Address) -> io::Result<TcpStream> {
        connect_tcp(address, self.connect_timeout)
    }
}
