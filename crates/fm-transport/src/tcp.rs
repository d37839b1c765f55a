use std::io::{self, Read, Write};
use std::net::ToSocketAddrs;
use std::time::{Duration, Instant};

use fm_config::PassthroughConfig;
use fm_protocol::Address;
use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token};

use crate::{Connection, Connector};

const STREAM: Token = Token(0);

/// Dials real TCP connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    fn connect(
        &self,
        address: &Address,
        config: &PassthroughConfig,
    ) -> io::Result<Box<dyn Connection>> {
        let stream = connect_tcp(address, config.connect_timeout)?;
        Ok(Box::new(TcpConnection::new(stream, *config)?))
    }
}

/// Resolves `address` and tries each socket address in turn, returning the
/// first blocking stream that connects within `timeout`.
pub fn connect_tcp(address: &Address, timeout: Duration) -> io::Result<std::net::TcpStream> {
    let mut last_err = None;
    for addr in (address.host(), address.port()).to_socket_addrs()? {
        match std::net::TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("{address} resolved to no socket addresses"),
        )
    }))
}

/// A non-blocking TCP stream driven by its own poll instance.
pub struct TcpConnection {
    stream: TcpStream,
    poll: Poll,
    events: Events,
    config: PassthroughConfig,
}

impl TcpConnection {
    pub fn new(stream: std::net::TcpStream, config: PassthroughConfig) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        let mut stream = TcpStream::from_std(stream);
        let poll = Poll::new()?;
        poll.registry()
            .register(&mut stream, STREAM, Interest::WRITABLE)?;
        Ok(Self {
            stream,
            poll,
            events: Events::with_capacity(8),
            config,
        })
    }

    fn write_request(&mut self, request: &[u8]) -> io::Result<()> {
        self.poll
            .registry()
            .reregister(&mut self.stream, STREAM, Interest::WRITABLE)?;
        let mut written = 0;
        while written < request.len() {
            match self.stream.write(&request[written..]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => written += n,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    self.poll
                        .poll(&mut self.events, Some(self.config.connect_timeout))?;
                    if self.events.is_empty() {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            "peer stopped accepting request bytes",
                        ));
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    // Reads until the peer closes or stays quiet for one poll interval after
    // at least one byte arrived.
    fn read_response(&mut self) -> io::Result<Vec<u8>> {
        self.poll
            .registry()
            .reregister(&mut self.stream, STREAM, Interest::READABLE)?;
        let started = Instant::now();
        let mut response = Vec::new();
        let mut chunk = vec![0_u8; self.config.read_chunk.max(1)];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    response.extend_from_slice(&chunk[..n]);
                    continue;
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }

            self.poll
                .poll(&mut self.events, Some(self.config.poll_interval))?;
            let readable = self
                .events
                .iter()
                .any(|event| event.is_readable() || event.is_read_closed());
            if readable {
                continue;
            }
            if !response.is_empty() {
                break;
            }
            if let Some(limit) = self.config.first_byte_timeout {
                if started.elapsed() >= limit {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "no response bytes before the first-byte timeout",
                    ));
                }
            }
        }
        Ok(response)
    }
}

impl Connection for TcpConnection {
    fn exchange(&mut self, request: &[u8]) -> io::Result<Vec<u8>> {
        self.write_request(request)?;
        self.read_response()
    }
}
