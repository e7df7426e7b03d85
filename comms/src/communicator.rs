use std::sync::Arc;

use crate::{Element, ReduceOp, Result};

/// Encrypts gradients before they leave the rank that computed them, and
/// absorbs the ciphertext on every rank once it has been broadcast.
///
/// Implementations keep their own state, so both methods take `&self`.
pub trait EncryptionPlugin: Send + Sync {
    /// Encrypts the gradient, given as interleaved `(grad, hess)` values.
    fn encrypt_gradient(&self, values: &[f32]) -> Vec<u8>;

    /// Hands the broadcast ciphertext to the plugin.
    fn sync_encrypted_gradient(&self, ciphertext: &[u8]);
}

/// A group of ranks exchanging data through blocking collectives.
///
/// Every rank must issue the same sequence of collective calls, a rank
/// taking a different branch than its peers will hang on the mismatched call.
#[trait_variant::make(Communicator: Send)]
pub trait CommunicatorTemplate {
    /// This rank's identity within the group.
    fn rank(&self) -> usize;

    /// The amount of ranks in the group.
    fn world_size(&self) -> usize;

    /// Copies `buf` from `root` into `buf` on every other rank.
    ///
    /// # Arguments
    /// * `buf` - The data to send on `root`, the destination anywhere else.
    ///   Every rank must pass a buffer of the same length.
    /// * `root` - The rank that owns the data.
    ///
    /// # Returns
    /// An error if the transport fails or the lengths disagree.
    async fn broadcast(&mut self, buf: &mut [u8], root: usize) -> Result<()>;

    /// Reduces `buf` element-wise across the group, in place on every rank.
    ///
    /// # Arguments
    /// * `buf` - This rank's contribution, overwritten with the result.
    /// * `op` - The reduction to apply.
    ///
    /// # Returns
    /// An error if the transport fails or the lengths disagree. Length errors
    /// are reported on every rank with the same message.
    async fn allreduce<T: Element>(&mut self, buf: &mut [T], op: ReduceOp) -> Result<()>;

    /// A handle to the encryption plugin attached to this group, if the group
    /// supports encrypted federated learning.
    fn encryption_plugin(&self) -> Option<Arc<dyn EncryptionPlugin>>;
}
