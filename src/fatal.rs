//! Where unrecoverable collective failures end up.

use log::error;

/// Reported when encrypted federated learning is requested but the
/// communicator has no encryption plugin.
pub const NO_ENCRYPTION: &str = "encryption support unavailable: \
    the communicator carries no encryption plugin for federated learning";

/// Terminates the worker after an unrecoverable collective failure.
pub trait FatalSink: Send + Sync {
    fn fatal(&self, msg: &str) -> !;
}

/// Logs the message and exits the process with status 1.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExitProcess;

impl FatalSink for ExitProcess {
    fn fatal(&self, msg: &str) -> ! {
        error!("{msg}");
        log::logger().flush();
        std::process::exit(1)
    }
}

/// Logs the message and panics with it, unwinding the worker's task or
/// thread instead of the whole process.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unwind;

impl FatalSink for Unwind {
    fn fatal(&self, msg: &str) -> ! {
        error!("{msg}");
        panic!("{msg}")
    }
}
