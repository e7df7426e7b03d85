//! The receiving end of a frame channel.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{Deserialize, LEN_TYPE_SIZE, LenType};

/// Frames announcing more than this many bytes are rejected before any
/// allocation.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1 << 30;

/// Reads length prefixed frames from the inner reader.
pub struct FrameReceiver<R: AsyncRead + Unpin> {
    rx: R,
    max_frame_size: usize,
}

impl<R: AsyncRead + Unpin> FrameReceiver<R> {
    /// Creates a new `FrameReceiver` instance.
    ///
    /// # Arguments
    /// * `rx` - The underlying reader.
    pub(super) fn new(rx: R) -> Self {
        Self {
            rx,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Replaces the largest frame body this receiver accepts.
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    /// Waits for the next frame and deserializes it.
    ///
    /// # Arguments
    /// * `buf` - The buffer to read the frame into, the returned `T`'s
    ///   lifetimes are tied to this buffer. It grows as needed and is
    ///   meant to be reused between calls.
    ///
    /// # Returns
    /// A result object that returns `T` on success or `io::Error` on failure,
    /// `InvalidData` if the frame is larger than the maximum frame size.
    pub async fn recv_into<'buf, T>(&mut self, buf: &'buf mut Vec<u8>) -> io::Result<T>
    where
        T: Deserialize<'buf>,
    {
        let mut size_buf = [0; LEN_TYPE_SIZE];
        self.rx.read_exact(&mut size_buf).await?;

        let len = LenType::from_be_bytes(size_buf);
        let len = usize::try_from(len)
            .ok()
            .filter(|len| *len <= self.max_frame_size)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("frame of {len} bytes exceeds the {} byte limit", self.max_frame_size),
                )
            })?;

        buf.resize(len, 0);
        self.rx.read_exact(buf).await?;

        T::deserialize(buf)
    }
}
