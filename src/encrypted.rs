use std::fmt::Display;

use comms::Communicator;
use log::debug;

use crate::{Aggregator, GradientMatrix, LEADER, NO_ENCRYPTION, PartitionInfo};

impl<C: Communicator> Aggregator<C> {
    /// Obtains the gradient of a training step on every worker.
    ///
    /// There are three cases:
    /// - Normal training, handled by `apply_with_labels_resizable`.
    /// - Vertical federated without encryption, handled the same way.
    /// - Vertical federated with encryption: the leader encrypts the gradient
    ///   through the communicator's plugin and the ciphertext is broadcast and
    ///   synced into the plugin on every worker before `out` is zeroed and
    ///   filled again through the plain path.
    ///
    /// # Arguments
    /// * `info` - The partition of the training data.
    /// * `grad_fn` - Computes the gradient into the given matrix.
    /// * `out` - The gradient matrix shared with the caller.
    ///
    /// Requesting encryption without a plugin, a failing `grad_fn` or a
    /// failing transport are all fatal on every worker.
    pub async fn broadcast_gradient<G, E>(
        &mut self,
        info: &PartitionInfo,
        mut grad_fn: G,
        out: &mut GradientMatrix,
    ) where
        G: FnMut(&mut GradientMatrix) -> Result<(), E>,
        E: Display,
    {
        if !(info.is_vertical_federated() && self.encrypted) {
            return self.apply_with_labels_resizable(info, out, grad_fn).await;
        }

        let Some(plugin) = self.comm.encryption_plugin() else {
            self.fatal(NO_ENCRYPTION)
        };

        let rc = async {
            let mut ciphertext = Vec::new();

            self.try_apply_with_labels(|| {
                grad_fn(&mut *out)?;
                ciphertext = plugin.encrypt_gradient(out.as_flat());
                Ok::<(), E>(())
            })
            .await?;

            let mut n_bytes = [ciphertext.len() as u64];
            self.comm
                .broadcast(bytemuck::cast_slice_mut(&mut n_bytes), LEADER)
                .await?;

            if !self.is_leader() {
                ciphertext.resize(n_bytes[0] as usize, 0);
            }

            self.comm.broadcast(&mut ciphertext, LEADER).await?;
            Ok::<_, comms::CommErr>(ciphertext)
        }
        .await;

        let ciphertext = self.check(rc);
        debug!(rank = self.comm.rank(), bytes = ciphertext.len(); "syncing encrypted gradient");
        plugin.sync_encrypted_gradient(&ciphertext);

        // Only the plugin may see the leader's plaintext gradient, the shared
        // buffer is refilled through the plain path from zeros.
        out.zero();
        self.apply_with_labels_resizable(info, out, grad_fn).await;
    }
}
