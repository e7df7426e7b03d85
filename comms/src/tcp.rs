//! Builds a `StarComm` across processes over TCP.

use std::{net::SocketAddr, time::Duration};

use log::{info, warn};
use tokio::{
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    time,
};

use crate::{
    CommErr, FrameReceiver, FrameSender, Result,
    msg::{Command, Msg},
    star::{HUB, StarComm},
};

/// A TCP based `StarComm`.
pub type TcpComm = StarComm<OwnedReadHalf, OwnedWriteHalf>;

type TcpChannel = (FrameReceiver<OwnedReadHalf>, FrameSender<OwnedWriteHalf>);

const CONNECT_ATTEMPTS: usize = 120;
const CONNECT_BACKOFF: Duration = Duration::from_millis(500);

/// Joins a group of `world_size` processes whose hub listens at `hub_addr`.
///
/// Rank 0 binds `hub_addr` and waits for every other rank, the rest connect
/// to it, retrying while the hub is not listening yet.
///
/// # Arguments
/// * `rank` - This process' rank.
/// * `world_size` - The amount of processes in the group.
/// * `hub_addr` - The address rank 0 listens at.
///
/// # Returns
/// The communicator for this rank.
pub async fn connect(rank: usize, world_size: usize, hub_addr: SocketAddr) -> Result<TcpComm> {
    if rank >= world_size {
        return Err(CommErr::InvalidRank { rank, world_size });
    }

    if rank == HUB {
        return accept_spokes(world_size, hub_addr).await;
    }

    let stream = connect_with_retry(rank, hub_addr).await?;
    stream.set_nodelay(true)?;

    let (rx, tx) = stream.into_split();
    let (rx, mut tx) = crate::channel(rx, tx);
    tx.send(&Msg::Control(Command::Join { rank })).await?;
    info!("rank {rank} joined the hub at {hub_addr}");

    StarComm::spoke(rank, world_size, rx, tx)
}

async fn connect_with_retry(rank: usize, hub_addr: SocketAddr) -> Result<TcpStream> {
    let mut attempt = 1;

    loop {
        match TcpStream::connect(hub_addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) if attempt < CONNECT_ATTEMPTS => {
                warn!("rank {rank} failed to reach the hub at {hub_addr}: {e}, retrying...");
                attempt += 1;
                time::sleep(CONNECT_BACKOFF).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

async fn accept_spokes(world_size: usize, hub_addr: SocketAddr) -> Result<TcpComm> {
    let listener = TcpListener::bind(hub_addr).await?;
    info!("hub listening at {hub_addr} for {} rank(s)", world_size - 1);

    let mut slots: Vec<Option<TcpChannel>> = (1..world_size).map(|_| None).collect();
    let mut rx_buf = Vec::new();

    for _ in 1..world_size {
        let (stream, addr) = listener.accept().await?;
        stream.set_nodelay(true)?;

        let (rx, tx) = stream.into_split();
        let (mut rx, tx) = crate::channel(rx, tx);

        let rank = match rx.recv_into(&mut rx_buf).await? {
            Msg::Control(Command::Join { rank }) => rank,
            other => {
                return Err(CommErr::UnexpectedMessage {
                    rank: HUB,
                    got: other.kind(),
                });
            }
        };

        let slot = rank
            .checked_sub(1)
            .and_then(|i| slots.get_mut(i))
            .filter(|slot| slot.is_none())
            .ok_or(CommErr::InvalidRank { rank, world_size })?;

        info!("rank {rank} connected from {addr}");
        *slot = Some((rx, tx));
    }

    let spokes = slots.into_iter().flatten().collect();
    Ok(StarComm::hub(spokes))
}
