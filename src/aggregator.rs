use std::{fmt::Display, ops::Div};

use comms::{Communicator, Element, ReduceOp};
use log::debug;

use crate::{CollectiveConfig, ExitProcess, FatalSink, PartitionInfo, Result};

/// The rank holding the labels in vertical federated learning.
pub const LEADER: usize = 0;

/// Floating point elements a ratio can be computed for.
pub trait Ratio: Element + Div<Output = Self> {
    const NAN: Self;
    const ZERO: Self;
}

impl Ratio for f32 {
    const NAN: Self = f32::NAN;
    const ZERO: Self = 0.0;
}

impl Ratio for f64 {
    const NAN: Self = f64::NAN;
    const ZERO: Self = 0.0;
}

/// Topology aware reductions and broadcasts for one worker of a training job.
///
/// Every worker owns its own `Aggregator` and all workers must issue the same
/// sequence of calls. Failures that can't be recovered from end up in the
/// `FatalSink`, so most operations return plain values.
pub struct Aggregator<C: Communicator> {
    pub(crate) comm: C,
    pub(crate) encrypted: bool,
    sink: Box<dyn FatalSink>,
}

impl<C: Communicator> Aggregator<C> {
    /// Creates a new `Aggregator` that exits the process on fatal failures.
    ///
    /// # Arguments
    /// * `comm` - This worker's communicator.
    /// * `config` - The job wide settings.
    ///
    /// # Returns
    /// A new `Aggregator` instance.
    pub fn new(comm: C, config: &CollectiveConfig) -> Self {
        Self {
            comm,
            encrypted: config.encrypted,
            sink: Box::new(ExitProcess),
        }
    }

    /// Replaces the sink fatal failures are reported to.
    pub fn with_fatal_sink<S: FatalSink + 'static>(mut self, sink: S) -> Self {
        self.sink = Box::new(sink);
        self
    }

    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    pub fn is_leader(&self) -> bool {
        self.comm.rank() == LEADER
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    pub fn into_inner(self) -> C {
        self.comm
    }

    /// Unwraps the accumulated result of a collective step, any failure is fatal.
    pub fn check<T, E: Display>(&self, rc: std::result::Result<T, E>) -> T {
        match rc {
            Ok(value) => value,
            Err(e) => self.fatal(&e.to_string()),
        }
    }

    pub(crate) fn fatal(&self, msg: &str) -> ! {
        self.sink.fatal(msg)
    }

    /// Finds the global max of `value` across all workers.
    ///
    /// Only row split data needs a reduction, with column split data every
    /// worker already holds a meaningful value and it is returned unchanged.
    pub async fn global_max<T: Element>(&mut self, info: &PartitionInfo, mut value: T) -> T {
        if info.is_row_split() {
            let rc = self
                .comm
                .allreduce(std::slice::from_mut(&mut value), ReduceOp::Max)
                .await;
            self.check(rc);
        }

        value
    }

    /// Sums `values` element-wise across all workers, in place.
    ///
    /// With column split data `values` are left untouched.
    pub async fn global_sum<T: Element>(
        &mut self,
        info: &PartitionInfo,
        values: &mut [T],
    ) -> Result<()> {
        if info.is_row_split() {
            debug!(rank = self.comm.rank(), len = values.len(); "global sum");
            self.comm.allreduce(values, ReduceOp::Sum).await?;
        }

        Ok(())
    }

    /// Computes `dividend / divisor` after summing both across all workers.
    ///
    /// # Returns
    /// The ratio, or NaN if the summed divisor is not positive.
    pub async fn global_ratio<T: Ratio>(
        &mut self,
        info: &PartitionInfo,
        dividend: T,
        divisor: T,
    ) -> T {
        let mut results = [dividend, divisor];
        let rc = self.global_sum(info, &mut results).await;
        self.check(rc);

        let [dividend, divisor] = results;
        if divisor <= T::ZERO {
            T::NAN
        } else {
            dividend / divisor
        }
    }
}
