//! A hub-and-spoke group: rank 0 is linked to every other rank and relays
//! every collective, the other ranks only talk to rank 0.

use std::{num::NonZeroUsize, sync::Arc};

use futures::future;
use log::debug;
use tokio::io::{self, AsyncRead, AsyncWrite, DuplexStream, ReadHalf, WriteHalf};

use crate::{
    CommErr, Communicator, Element, EncryptionPlugin, FrameReceiver, FrameSender, ReduceOp,
    Result,
    msg::{Command, Msg},
};

/// The rank every other rank is linked to.
pub const HUB: usize = 0;

/// The pipe capacity used by `local_group`.
const LOCAL_PIPE_SIZE: usize = 64 * 1024;

/// Both ends of the channel to a single peer.
struct Link<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    peer: usize,
    rx: FrameReceiver<R>,
    tx: FrameSender<W>,
}

impl<R, W> Link<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Receives a data frame of exactly `expected` bytes.
    async fn recv_data<'buf>(
        &mut self,
        buf: &'buf mut Vec<u8>,
        expected: usize,
    ) -> Result<&'buf [u8]> {
        let peer = self.peer;

        match self.rx.recv_into(buf).await? {
            Msg::Data(bytes) if bytes.len() == expected => Ok(bytes),
            Msg::Data(bytes) => Err(CommErr::LengthMismatch {
                rank: peer,
                got: bytes.len(),
                expected,
            }),
            Msg::Err(text) => Err(CommErr::Peer(text.into_owned())),
            other => Err(CommErr::UnexpectedMessage {
                rank: peer,
                got: other.kind(),
            }),
        }
    }
}

enum Role<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    Hub { spokes: Vec<Link<R, W>> },
    Spoke { hub: Link<R, W> },
}

/// A `Communicator` over a star of frame channels.
pub struct StarComm<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    rank: usize,
    world_size: usize,
    role: Role<R, W>,
    rx_buf: Vec<u8>,
    plugin: Option<Arc<dyn EncryptionPlugin>>,
}

impl<R, W> StarComm<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Creates the hub of a group.
    ///
    /// # Arguments
    /// * `spokes` - The channels to ranks `1..=spokes.len()`, in rank order.
    ///
    /// # Returns
    /// The communicator for rank 0.
    pub fn hub(spokes: Vec<(FrameReceiver<R>, FrameSender<W>)>) -> Self {
        let spokes: Vec<_> = spokes
            .into_iter()
            .enumerate()
            .map(|(i, (rx, tx))| Link { peer: i + 1, rx, tx })
            .collect();

        Self {
            rank: HUB,
            world_size: spokes.len() + 1,
            role: Role::Hub { spokes },
            rx_buf: Vec::new(),
            plugin: None,
        }
    }

    /// Creates a non-hub member of a group.
    ///
    /// # Arguments
    /// * `rank` - This rank, must be in `1..world_size`.
    /// * `world_size` - The size of the group.
    /// * `rx` - The receiving end of the channel to the hub.
    /// * `tx` - The sending end of the channel to the hub.
    ///
    /// # Returns
    /// The communicator, or `InvalidRank` if `rank` can't be a spoke.
    pub fn spoke(
        rank: usize,
        world_size: usize,
        rx: FrameReceiver<R>,
        tx: FrameSender<W>,
    ) -> Result<Self> {
        if rank == HUB || rank >= world_size {
            return Err(CommErr::InvalidRank { rank, world_size });
        }

        Ok(Self {
            rank,
            world_size,
            role: Role::Spoke {
                hub: Link { peer: HUB, rx, tx },
            },
            rx_buf: Vec::new(),
            plugin: None,
        })
    }

    /// Attaches an encryption plugin, enabling encrypted federated learning.
    pub fn with_plugin(mut self, plugin: Arc<dyn EncryptionPlugin>) -> Self {
        self.plugin = Some(plugin);
        self
    }

    /// Tells the peers this rank is leaving the group.
    pub async fn leave(&mut self) -> Result<()> {
        let msg = Msg::Control(Command::Leave);

        match &mut self.role {
            Role::Hub { spokes } => send_all(spokes.iter_mut(), &msg).await,
            Role::Spoke { hub } => Ok(hub.tx.send(&msg).await?),
        }
    }
}

/// Sends `msg` to every link concurrently.
async fn send_all<'a, 'l, R, W>(
    links: impl Iterator<Item = &'l mut Link<R, W>>,
    msg: &'a Msg<'a>,
) -> Result<()>
where
    R: AsyncRead + Unpin + 'l,
    W: AsyncWrite + Unpin + 'l,
{
    future::try_join_all(links.map(|link| link.tx.send(msg))).await?;
    Ok(())
}

/// Reports `err` to every link so the whole group fails with the same message.
///
/// Send failures are ignored, `err` itself is returned.
async fn fail_all<'l, R, W>(
    links: impl Iterator<Item = &'l mut Link<R, W>>,
    err: CommErr,
) -> CommErr
where
    R: AsyncRead + Unpin + 'l,
    W: AsyncWrite + Unpin + 'l,
{
    let text = err.to_string();
    let msg = Msg::Err(text.as_str().into());
    let _ = future::join_all(links.map(|link| link.tx.send(&msg))).await;
    err
}

impl<R, W> Communicator for StarComm<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    async fn broadcast(&mut self, buf: &mut [u8], root: usize) -> Result<()> {
        let Self {
            rank,
            world_size,
            role,
            rx_buf,
            ..
        } = self;

        if root >= *world_size {
            return Err(CommErr::InvalidRank {
                rank: root,
                world_size: *world_size,
            });
        }

        debug!(rank = *rank, root = root, bytes = buf.len(); "broadcast");

        match role {
            Role::Hub { spokes } if root == HUB => {
                send_all(spokes.iter_mut(), &Msg::Data(&*buf)).await
            }
            Role::Hub { spokes } => {
                let (sources, rest): (Vec<_>, Vec<_>) =
                    spokes.iter_mut().partition(|link| link.peer == root);

                let Some(source) = sources.into_iter().next() else {
                    return Err(CommErr::InvalidRank {
                        rank: root,
                        world_size: *world_size,
                    });
                };

                match source.recv_data(rx_buf, buf.len()).await {
                    Ok(bytes) => {
                        buf.copy_from_slice(bytes);
                        send_all(rest.into_iter(), &Msg::Data(&*buf)).await
                    }
                    Err(err) => Err(fail_all(rest.into_iter(), err).await),
                }
            }
            Role::Spoke { hub } if root == *rank => Ok(hub.tx.send(&Msg::Data(&*buf)).await?),
            Role::Spoke { hub } => {
                let bytes = hub.recv_data(rx_buf, buf.len()).await?;
                buf.copy_from_slice(bytes);
                Ok(())
            }
        }
    }

    async fn allreduce<T: Element>(&mut self, buf: &mut [T], op: ReduceOp) -> Result<()> {
        let Self {
            rank, role, rx_buf, ..
        } = self;

        let expected = size_of_val(buf);
        debug!(rank = *rank, bytes = expected; "allreduce {op:?}");

        match role {
            Role::Hub { spokes } => {
                let mut first_err = None;

                // Folds in rank order so every run produces the same floating point result.
                for link in spokes.iter_mut() {
                    match link.recv_data(rx_buf, expected).await {
                        Ok(bytes) => {
                            let other: Vec<T> = bytemuck::pod_collect_to_vec(bytes);
                            op.apply(buf, &other);
                        }
                        Err(err) => {
                            first_err.get_or_insert(err);
                        }
                    }
                }

                match first_err {
                    Some(err) => Err(fail_all(spokes.iter_mut(), err).await),
                    None => {
                        let msg = Msg::Data(bytemuck::cast_slice(&*buf));
                        send_all(spokes.iter_mut(), &msg).await
                    }
                }
            }
            Role::Spoke { hub } => {
                hub.tx.send(&Msg::Data(bytemuck::cast_slice(&*buf))).await?;
                let bytes = hub.recv_data(rx_buf, expected).await?;
                bytemuck::cast_slice_mut::<T, u8>(buf).copy_from_slice(bytes);
                Ok(())
            }
        }
    }

    fn encryption_plugin(&self) -> Option<Arc<dyn EncryptionPlugin>> {
        self.plugin.clone()
    }
}

/// A local pipe based `StarComm`.
pub type LocalComm = StarComm<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

/// Builds a whole group inside this process over in-memory pipes.
///
/// # Arguments
/// * `world_size` - The amount of ranks.
///
/// # Returns
/// One communicator per rank, indexed by rank.
pub fn local_group(world_size: NonZeroUsize) -> Vec<LocalComm> {
    let n = world_size.get();
    let mut hub_ends = Vec::with_capacity(n - 1);
    let mut comms = Vec::with_capacity(n);

    for rank in 1..n {
        let (hub_side, spoke_side) = io::duplex(LOCAL_PIPE_SIZE);

        let (rx, tx) = io::split(hub_side);
        hub_ends.push(crate::channel(rx, tx));

        let (rx, tx) = io::split(spoke_side);
        let (rx, tx) = crate::channel(rx, tx);
        comms.push(StarComm {
            rank,
            world_size: n,
            role: Role::Spoke {
                hub: Link { peer: HUB, rx, tx },
            },
            rx_buf: Vec::new(),
            plugin: None,
        });
    }

    comms.insert(HUB, StarComm::hub(hub_ends));
    comms
}
