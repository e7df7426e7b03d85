//! Topology aware aggregation for distributed training.
//!
//! Decides whether reductions are global or local depending on how the data
//! is partitioned, runs label dependent computations on the leader in vertical
//! federated learning and turns any failure into the same fatal error on
//! every worker.

mod aggregator;
pub mod config;
mod encrypted;
pub mod error;
pub mod fatal;
pub mod gradient;
mod labels;
pub mod topology;

pub use aggregator::{Aggregator, LEADER, Ratio};
pub use config::CollectiveConfig;
pub use error::{CollectiveErr, Result};
pub use fatal::{ExitProcess, FatalSink, NO_ENCRYPTION, Unwind};
pub use gradient::{GradientMatrix, GradientPair, Resizable};
pub use topology::{DataSplit, PartitionInfo};
