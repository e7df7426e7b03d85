//! Running a computation where the labels are.
//!
//! Normally every worker has the labels and a computation simply runs
//! locally. In vertical federated learning the labels only live on the
//! leader, so the computation runs there and its result, or its failure, is
//! broadcast to everyone else.

use std::{
    any::Any,
    fmt::Display,
    panic::{self, AssertUnwindSafe},
};

use bytemuck::Pod;
use comms::{Communicator, ReduceOp};
use log::{debug, warn};

use crate::{Aggregator, CollectiveErr, LEADER, PartitionInfo, Resizable};

/// Reported when the leader's computation fails with an empty message, an
/// empty message would read as success to the other workers.
const SILENT_FAILURE: &str = "computation failed on the leader without a message";

/// The steps every worker goes through for a single leader computation.
#[derive(Debug)]
enum Phase {
    /// The leader runs the computation, everyone else waits.
    Computing,
    /// The leader's failure message, empty on success or on other workers,
    /// is about to be shared.
    AwaitingOutcome(String),
    /// The leader failed, every worker terminates with this message.
    Aborting(String),
    /// The computation succeeded and its result can be broadcast.
    Propagating,
}

impl<C: Communicator> Aggregator<C> {
    /// Applies `f` to `buffer` where the labels are.
    ///
    /// Without vertical federated learning `f` runs on every worker. Otherwise
    /// it only runs on the leader and the resulting `buffer` is broadcast, so
    /// every worker must pass a buffer of the same length. Workers that
    /// disagree on it all abort with the same message.
    ///
    /// # Arguments
    /// * `info` - The partition of the training data.
    /// * `buffer` - Where `f` writes its result.
    /// * `f` - The computation.
    ///
    /// Any failure, from `f` or the transport, is fatal on every worker.
    pub async fn apply_with_labels<T, F, E>(&mut self, info: &PartitionInfo, buffer: &mut [T], f: F)
    where
        T: Pod,
        F: FnOnce(&mut [T]) -> Result<(), E>,
        E: Display,
    {
        if !info.is_vertical_federated() {
            let res = f(buffer);
            return self.check(res);
        }

        let rc = async {
            self.try_apply_with_labels(|| f(&mut *buffer)).await?;
            self.agree_on_len(size_of_val(&*buffer)).await?;
            self.comm
                .broadcast(bytemuck::cast_slice_mut(&mut *buffer), LEADER)
                .await?;

            Ok::<_, CollectiveErr>(())
        }
        .await;

        self.check(rc);
    }

    /// Applies `f` to `result` where the labels are, reshaping `result` on the
    /// other workers to whatever length and row width the leader produced.
    ///
    /// # Arguments
    /// * `info` - The partition of the training data.
    /// * `result` - Where `f` writes its result.
    /// * `f` - The computation.
    ///
    /// Any failure, from `f` or the transport, is fatal on every worker.
    pub async fn apply_with_labels_resizable<B, F, E>(
        &mut self,
        info: &PartitionInfo,
        result: &mut B,
        f: F,
    ) where
        B: Resizable,
        F: FnOnce(&mut B) -> Result<(), E>,
        E: Display,
    {
        if !info.is_vertical_federated() {
            let res = f(result);
            return self.check(res);
        }

        let rc = async {
            self.try_apply_with_labels(|| f(&mut *result)).await?;

            let mut shape = [result.len() as u64, result.width() as u64];
            self.comm
                .broadcast(bytemuck::cast_slice_mut(&mut shape), LEADER)
                .await?;

            let [len, width] = shape;
            result.reshape(len as usize, width as usize);
            self.comm
                .broadcast(bytemuck::cast_slice_mut(result.as_mut_slice()), LEADER)
                .await
        }
        .await;

        self.check(rc);
    }

    /// Checks that every worker passed a buffer of `n_bytes`.
    ///
    /// A single all-reduce of `(len, !len)` under `Max` gives every worker
    /// both the largest and the smallest length.
    async fn agree_on_len(&mut self, n_bytes: usize) -> crate::Result<()> {
        let n_bytes = n_bytes as u64;
        let mut bounds = [n_bytes, !n_bytes];
        self.comm.allreduce(&mut bounds, ReduceOp::Max).await?;

        let (max, min) = (bounds[0], !bounds[1]);
        if max == min {
            return Ok(());
        }

        Err(CollectiveErr::LengthDisagreement { min, max })
    }

    /// Runs `f` on the leader and shares its outcome with every worker.
    ///
    /// If `f` fails, every worker reaches the fatal sink with the leader's
    /// message before this returns.
    ///
    /// # Returns
    /// A transport error if sharing the outcome failed.
    pub(crate) async fn try_apply_with_labels<F, E>(&mut self, f: F) -> comms::Result<()>
    where
        F: FnOnce() -> Result<(), E>,
        E: Display,
    {
        let rank = self.comm.rank();
        let mut f = Some(f);
        let mut phase = Phase::Computing;

        loop {
            debug!(rank = rank; "leader step {phase:?}");

            phase = match phase {
                Phase::Computing => {
                    let msg = match f.take() {
                        Some(f) if rank == LEADER => capture(f),
                        _ => String::new(),
                    };

                    Phase::AwaitingOutcome(msg)
                }
                Phase::AwaitingOutcome(msg) => {
                    let mut msg_size = [msg.len() as u64];
                    self.comm
                        .broadcast(bytemuck::cast_slice_mut(&mut msg_size), LEADER)
                        .await?;

                    if msg_size[0] == 0 {
                        Phase::Propagating
                    } else {
                        let mut bytes = msg.into_bytes();
                        bytes.resize(msg_size[0] as usize, 0);
                        self.comm.broadcast(&mut bytes, LEADER).await?;

                        Phase::Aborting(String::from_utf8_lossy(&bytes).into_owned())
                    }
                }
                Phase::Aborting(msg) => self.fatal(&msg),
                Phase::Propagating => return Ok(()),
            };
        }
    }
}

/// Runs `f`, turning a returned error or a panic into its message.
///
/// # Returns
/// An empty string on success.
fn capture<F, E>(f: F) -> String
where
    F: FnOnce() -> Result<(), E>,
    E: Display,
{
    let msg = match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => return String::new(),
        Ok(Err(e)) => e.to_string(),
        Err(payload) => panic_message(payload.as_ref()),
    };

    warn!("computation failed on the leader: {msg}");

    if msg.is_empty() {
        SILENT_FAILURE.to_string()
    } else {
        msg
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "computation panicked on the leader".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::fmt;

    use super::*;

    struct Blank;

    impl fmt::Display for Blank {
        fn fmt(&self, _f: &mut fmt::Formatter<'_>) -> fmt::Result {
            Ok(())
        }
    }

    #[test]
    fn capture_success_is_empty() {
        assert_eq!(capture(|| Ok::<_, String>(())), "");
    }

    #[test]
    fn capture_keeps_error_text() {
        assert_eq!(capture(|| Err("label out of range")), "label out of range");
    }

    #[test]
    fn capture_turns_panics_into_messages() {
        assert_eq!(capture(|| -> Result<(), String> { panic!("boom {}", 7) }), "boom 7");
        assert_eq!(capture(|| -> Result<(), String> { panic!("static") }), "static");
    }

    #[test]
    fn capture_never_reports_an_empty_failure() {
        assert_eq!(capture(|| Err(Blank)), SILENT_FAILURE);
    }
}
