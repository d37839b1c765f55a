#![forbid(unsafe_code)]

//! The simulation scope and the virtual sockets it hands out.
//!
//! A [`Simulation`] owns the entry registry, request history, capture store
//! and strict-mode policy. Sockets created from it answer every write from a
//! registered entry, a stored capture, or a real exchange, in that order.

mod dialer;
mod error;
mod scope;
mod socket;
mod tls;

pub use dialer::{Dialer, TcpDialer};
pub use error::SimulationError;
pub use scope::{ScopeGuard, ScopeHooks, Simulation};
pub use socket::{SocketState, VirtualSocket};
pub use tls::{CIPHER, PeerCertificate};
