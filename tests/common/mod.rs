#![allow(dead_code)]

use std::{
    num::NonZeroUsize,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use collective::{Aggregator, CollectiveConfig, DataSplit, PartitionInfo, Unwind};
use comms::{Communicator, Element, EncryptionPlugin, LocalComm, ReduceOp, local_group};
use tokio::time::timeout;

pub const ROW: PartitionInfo = PartitionInfo {
    split: DataSplit::Row,
    federated: false,
};

pub const COLUMN: PartitionInfo = PartitionInfo {
    split: DataSplit::Column,
    federated: false,
};

pub const VERTICAL_FEDERATED: PartitionInfo = PartitionInfo {
    split: DataSplit::Column,
    federated: true,
};

/// A transport that only counts how many times it was used.
#[derive(Default)]
pub struct CountingComm {
    pub rank: usize,
    pub calls: usize,
}

impl CountingComm {
    pub fn new(rank: usize) -> Self {
        Self { rank, calls: 0 }
    }
}

impl Communicator for CountingComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        4
    }

    async fn broadcast(&mut self, _buf: &mut [u8], _root: usize) -> comms::Result<()> {
        self.calls += 1;
        Ok(())
    }

    async fn allreduce<T: Element>(&mut self, _buf: &mut [T], _op: ReduceOp) -> comms::Result<()> {
        self.calls += 1;
        Ok(())
    }

    fn encryption_plugin(&self) -> Option<Arc<dyn EncryptionPlugin>> {
        None
    }
}

/// A plugin that "encrypts" by flipping bits and records what it syncs.
#[derive(Default)]
pub struct RecordingPlugin {
    pub encrypted: AtomicUsize,
    pub synced: Mutex<Vec<Vec<u8>>>,
}

pub const KEY: u8 = 0x5a;

impl EncryptionPlugin for RecordingPlugin {
    fn encrypt_gradient(&self, values: &[f32]) -> Vec<u8> {
        self.encrypted.fetch_add(1, Ordering::SeqCst);
        bytemuck::cast_slice::<f32, u8>(values)
            .iter()
            .map(|b| b ^ KEY)
            .collect()
    }

    fn sync_encrypted_gradient(&self, ciphertext: &[u8]) {
        self.synced.lock().unwrap().push(ciphertext.to_vec());
    }
}

/// Aggregators for a whole in-process group, failing by unwinding.
pub fn group(world_size: usize, config: CollectiveConfig) -> Vec<Aggregator<LocalComm>> {
    local_group(NonZeroUsize::new(world_size).unwrap())
        .into_iter()
        .map(|comm| Aggregator::new(comm, &config).with_fatal_sink(Unwind))
        .collect()
}

/// Like `group`, with a fresh `RecordingPlugin` attached to every rank.
pub fn encrypted_group(
    world_size: usize,
    config: CollectiveConfig,
) -> (Vec<Aggregator<LocalComm>>, Vec<Arc<RecordingPlugin>>) {
    let plugins: Vec<_> = (0..world_size)
        .map(|_| Arc::new(RecordingPlugin::default()))
        .collect();

    let aggs = local_group(NonZeroUsize::new(world_size).unwrap())
        .into_iter()
        .zip(&plugins)
        .map(|(comm, plugin)| {
            let comm = comm.with_plugin(plugin.clone());
            Aggregator::new(comm, &config).with_fatal_sink(Unwind)
        })
        .collect();

    (aggs, plugins)
}

/// Runs `f` on every aggregator concurrently.
///
/// # Returns
/// Per rank, the output of `f` or the message the rank aborted with.
pub async fn run<C, T, F, Fut>(aggs: Vec<Aggregator<C>>, f: F) -> Vec<Result<T, String>>
where
    C: Communicator + Send + 'static,
    T: Send + 'static,
    F: Fn(Aggregator<C>) -> Fut,
    Fut: Future<Output = T> + Send + 'static,
{
    let handles: Vec<_> = aggs.into_iter().map(|agg| tokio::spawn(f(agg))).collect();

    let joined = timeout(Duration::from_secs(10), futures::future::join_all(handles))
        .await
        .expect("the group hung");

    joined
        .into_iter()
        .map(|res| {
            res.map_err(|err| {
                let payload = err.into_panic();
                match payload.downcast::<String>() {
                    Ok(msg) => *msg,
                    Err(payload) => payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .unwrap_or_default(),
                }
            })
        })
        .collect()
}

/// Every rank must have succeeded.
pub fn all_ok<T>(out: Vec<Result<T, String>>) -> Vec<T> {
    out.into_iter()
        .enumerate()
        .map(|(rank, res)| res.unwrap_or_else(|msg| panic!("rank {rank} aborted: {msg}")))
        .collect()
}

/// Every rank must have aborted.
pub fn all_aborted<T: std::fmt::Debug>(out: Vec<Result<T, String>>) -> Vec<String> {
    out.into_iter()
        .enumerate()
        .map(|(rank, res)| match res {
            Ok(value) => panic!("rank {rank} returned {value:?}"),
            Err(msg) => msg,
        })
        .collect()
}
