//! The sending end of a frame channel.

use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{LEN_TYPE_SIZE, LenType, Serialize};

/// Writes length prefixed frames into the inner writer.
pub struct FrameSender<W>
where
    W: AsyncWrite + Unpin,
{
    tx: W,
    buf: Vec<u8>,
}

impl<W: AsyncWrite + Unpin> FrameSender<W> {
    pub(super) fn new(tx: W) -> Self {
        Self {
            tx,
            buf: Vec::new(),
        }
    }

    /// Sends `msg` as a single frame and flushes the writer.
    ///
    /// Payloads the message borrows are written straight from the caller's
    /// memory after the header, without going through the internal buffer.
    pub async fn send<'a, T: Serialize<'a>>(&mut self, msg: &'a T) -> io::Result<()> {
        let Self { buf, tx } = self;

        let tail = encode(buf, msg);
        tx.write_all(buf).await?;

        if let Some(tail) = tail {
            tx.write_all(tail).await?;
        }

        tx.flush().await
    }
}

/// Writes the length prefix and the owned part of `msg` into `buf`.
///
/// # Returns
/// The borrowed part of the frame, to be written right after `buf`.
fn encode<'a, T: Serialize<'a>>(buf: &mut Vec<u8>, msg: &'a T) -> Option<&'a [u8]> {
    buf.clear();
    buf.resize(LEN_TYPE_SIZE, 0);

    let tail = msg.serialize(buf);
    let len = buf.len() - LEN_TYPE_SIZE + tail.map_or(0, <[u8]>::len);
    buf[..LEN_TYPE_SIZE].copy_from_slice(&(len as LenType).to_be_bytes());

    tail
}
