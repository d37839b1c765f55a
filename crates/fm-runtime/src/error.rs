use std::io;

use fm_config::ConfigError;
use fm_entry::{EntryError, ScriptedError};
use fm_protocol::Address;
use fm_record::CaptureError;
use fm_registry::UnservedEntries;

#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("socket is not connected")]
    NotConnected,
    #[error("socket is already connected to {0}")]
    AlreadyConnected(Address),
    #[error("socket is closed")]
    Closed,
    #[error("no response buffered yet")]
    WouldBlock,
    #[error(
        "real network access to {address} attempted while strict mode is active.\nRegistered entries:\n{registered}"
    )]
    UnmatchedStrictAccess { address: Address, registered: String },
    #[error(transparent)]
    Scripted(#[from] ScriptedError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error("passthrough to {address} failed: {source}")]
    Passthrough { address: Address, source: io::Error },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Entry(#[from] EntryError),
    #[error(transparent)]
    Unserved(#[from] UnservedEntries),
    #[error("readiness pipe: {0}")]
    Readiness(io::Error),
}

impl SimulationError {
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::NotConnected => "socket.not_connected",
            Self::AlreadyConnected(_) => "socket.already_connected",
            Self::Closed => "socket.closed",
            Self::WouldBlock => "socket.would_block",
            Self::UnmatchedStrictAccess { .. } => "strict.unmatched_access",
            Self::Scripted(_) => "entry.scripted_error",
            Self::Capture(err) => err.reason_code(),
            Self::Passthrough { .. } => "passthrough.io",
            Self::Config(err) => err.reason_code(),
            Self::Entry(err) => err.reason_code(),
            Self::Unserved(err) => err.reason_code(),
            Self::Readiness(_) => "socket.readiness_pipe",
        }
    }
}

impl From<SimulationError> for io::Error {
    fn from(err: SimulationError) -> Self {
        match err {
            SimulationError::Scripted(scripted) => scripted.into(),
            SimulationError::Passthrough { source, .. } | SimulationError::Readiness(source) => {
                source
            }
            SimulationError::WouldBlock => io::Error::new(io::ErrorKind::WouldBlock, err),
            SimulationError::UnmatchedStrictAccess { .. } => {
                io::Error::new(io::ErrorKind::PermissionDenied, err)
            }
            SimulationError::NotConnected | SimulationError::Closed => {
                io::Error::new(io::ErrorKind::NotConnected, err)
            }
            SimulationError::AlreadyConnected(_) => {
                io::Error::new(io::ErrorKind::AlreadyExists, err)
            }
            SimulationError::Config(_) | SimulationError::Entry(_) => {
                io::Error::new(io::ErrorKind::InvalidInput, err)
            }
            SimulationError::Capture(_) | SimulationError::Unserved(_) => io::Error::other(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use fm_entry::ScriptedError;
    use fm_protocol::Address;

    use super::SimulationError;

    #[test]
    fn io_conversion_preserves_kinds() {
        let strict = SimulationError::UnmatchedStrictAccess {
            address: Address::new("example.com", 80),
            registered: String::new(),
        };
        assert_eq!(strict.reason_code(), "strict.unmatched_access");
        assert_eq!(io::Error::from(strict).kind(), io::ErrorKind::PermissionDenied);

        let scripted: io::Error =
            SimulationError::from(ScriptedError::new(io::ErrorKind::TimedOut, "slow")).into();
        assert_eq!(scripted.kind(), io::ErrorKind::TimedOut);
        assert_eq!(scripted.to_string(), "slow");

        let passthrough = SimulationError::Passthrough {
            address: Address::new("localhost", 1),
            source: io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
        };
        assert_eq!(
            io::Error::from(passthrough).kind(),
            io::ErrorKind::ConnectionRefused
        );
        assert_eq!(
            io::Error::from(SimulationError::WouldBlock).kind(),
            io::ErrorKind::WouldBlock
        );
    }
}
