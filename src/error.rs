use std::{error::Error, fmt, io};

use comms::CommErr;

/// The collective module's result type.
pub type Result<T> = std::result::Result<T, CollectiveErr>;

/// Failures surfaced by the aggregation layer before they become fatal.
#[derive(Debug)]
pub enum CollectiveErr {
    Comm(CommErr),
    /// Workers passed result buffers of different sizes, in bytes.
    LengthDisagreement {
        min: u64,
        max: u64,
    },
    Config(String),
    Io(io::Error),
    Json(serde_json::Error),
}

impl fmt::Display for CollectiveErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectiveErr::Comm(e) => write!(f, "{e}"),
            CollectiveErr::LengthDisagreement { min, max } => write!(
                f,
                "workers disagree on the result buffer: between {min} and {max} bytes"
            ),
            CollectiveErr::Config(msg) => write!(f, "invalid config: {msg}"),
            CollectiveErr::Io(e) => write!(f, "io error: {e}"),
            CollectiveErr::Json(e) => write!(f, "json error: {e}"),
        }
    }
}

impl Error for CollectiveErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CollectiveErr::Comm(e) => Some(e),
            CollectiveErr::Io(e) => Some(e),
            CollectiveErr::Json(e) => Some(e),
            CollectiveErr::Config(_) | CollectiveErr::LengthDisagreement { .. } => None,
        }
    }
}

impl From<CommErr> for CollectiveErr {
    fn from(value: CommErr) -> Self {
        Self::Comm(value)
    }
}

impl From<io::Error> for CollectiveErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for CollectiveErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}
