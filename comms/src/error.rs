use std::{error::Error, fmt, io};

/// The comms module's result type.
pub type Result<T> = std::result::Result<T, CommErr>;

/// Failures of a collective operation.
#[derive(Debug)]
pub enum CommErr {
    Io(io::Error),
    /// Another rank failed the collective and announced it with an error
    /// frame, the message is shown verbatim so every rank reports the same text.
    Peer(String),
    LengthMismatch {
        rank: usize,
        got: usize,
        expected: usize,
    },
    InvalidRank {
        rank: usize,
        world_size: usize,
    },
    UnexpectedMessage {
        rank: usize,
        got: &'static str,
    },
}

impl fmt::Display for CommErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommErr::Io(e) => write!(f, "io error: {e}"),
            CommErr::Peer(msg) => write!(f, "{msg}"),
            CommErr::LengthMismatch {
                rank,
                got,
                expected,
            } => write!(
                f,
                "length mismatch from rank {rank}: got {got} bytes, expected {expected}"
            ),
            CommErr::InvalidRank { rank, world_size } => {
                write!(f, "invalid rank {rank} for a group of {world_size}")
            }
            CommErr::UnexpectedMessage { rank, got } => {
                write!(f, "unexpected message from rank {rank}: got {got}")
            }
        }
    }
}

impl Error for CommErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CommErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for CommErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<CommErr> for io::Error {
    fn from(value: CommErr) -> Self {
        match value {
            CommErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
