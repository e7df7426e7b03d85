//! Transport for the aggregation layer: a length prefixed frame codec over
//! async streams and a group communicator built on top of it.

mod communicator;
mod deserialize;
mod error;
pub mod msg;
mod receiver;
pub mod reduce;
mod sender;
mod serialize;
pub mod star;
pub mod tcp;

use tokio::io::{AsyncRead, AsyncWrite};

pub use communicator::{Communicator, EncryptionPlugin};
pub use deserialize::Deserialize;
pub use error::{CommErr, Result};
pub use receiver::{DEFAULT_MAX_FRAME_SIZE, FrameReceiver};
pub use reduce::{Element, ReduceOp};
pub use sender::FrameSender;
pub use serialize::Serialize;
pub use star::{LocalComm, StarComm, local_group};

type LenType = u64;
const LEN_TYPE_SIZE: usize = size_of::<LenType>();

/// Creates both `FrameReceiver` and `FrameSender` channel parts.
///
/// # Arguments
/// * `rx` - An async readable.
/// * `tx` - An async writable.
///
/// # Returns
/// Both ends of the communication.
pub fn channel<R, W>(rx: R, tx: W) -> (FrameReceiver<R>, FrameSender<W>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    (FrameReceiver::new(rx), FrameSender::new(tx))
}
