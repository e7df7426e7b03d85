mod common;

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use collective::{
    CollectiveConfig, GradientMatrix, GradientPair, LEADER, NO_ENCRYPTION, PartitionInfo,
};
use common::{KEY, ROW, VERTICAL_FEDERATED, all_aborted, all_ok, encrypted_group, group, run};

const N_SAMPLES: usize = 5;
const N_TARGETS: usize = 2;

fn fill(m: &mut GradientMatrix) {
    for (i, p) in m.values_mut().iter_mut().enumerate() {
        *p = GradientPair::new(i as f32 - 2.5, 0.25 * (i + 1) as f32);
    }
}

fn expected() -> GradientMatrix {
    let mut m = GradientMatrix::zeros(N_SAMPLES, N_TARGETS);
    fill(&mut m);
    m
}

fn config(partition: PartitionInfo, encrypted: bool) -> CollectiveConfig {
    CollectiveConfig {
        partition,
        encrypted,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn row_split_computes_locally_and_ignores_the_plugin() {
    let (aggs, plugins) = encrypted_group(3, config(ROW, true));

    let out = run(aggs, |mut agg| async move {
        let mut out = GradientMatrix::zeros(N_SAMPLES, N_TARGETS);
        let mut calls = 0;

        agg.broadcast_gradient(
            &ROW,
            |m| {
                calls += 1;
                fill(m);
                Ok::<_, String>(())
            },
            &mut out,
        )
        .await;

        (out, calls)
    })
    .await;

    for (out, calls) in all_ok(out) {
        assert_eq!(out, expected());
        assert_eq!(calls, 1);
    }

    for plugin in plugins {
        assert_eq!(plugin.encrypted.load(Ordering::SeqCst), 0);
        assert!(plugin.synced.lock().unwrap().is_empty());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn vertical_federated_without_encryption_shares_the_leaders_gradient() {
    let out = run(group(4, config(VERTICAL_FEDERATED, false)), |mut agg| async move {
        let leader = agg.is_leader();
        let mut out = GradientMatrix::zeros(N_SAMPLES, N_TARGETS);
        let mut calls = 0;

        agg.broadcast_gradient(
            &VERTICAL_FEDERATED,
            |m| {
                calls += 1;
                fill(m);
                Ok::<_, String>(())
            },
            &mut out,
        )
        .await;

        (leader, out, calls)
    })
    .await;

    for (leader, out, calls) in all_ok(out) {
        assert_eq!(out, expected());
        assert_eq!(calls, usize::from(leader));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn encrypted_gradient_is_synced_everywhere_then_recomputed() {
    let (aggs, plugins) = encrypted_group(3, config(VERTICAL_FEDERATED, true));
    let seen = Arc::new(Mutex::new(Vec::new()));

    let out = run(aggs, |mut agg| {
        let seen = seen.clone();
        async move {
            let mut out = GradientMatrix::zeros(N_SAMPLES, N_TARGETS);

            agg.broadcast_gradient(
                &VERTICAL_FEDERATED,
                |m| {
                    // What the leader finds in the buffer before each computation.
                    seen.lock().unwrap().push(m.clone());
                    fill(m);
                    Ok::<_, String>(())
                },
                &mut out,
            )
            .await;

            out
        }
    })
    .await;

    for out in all_ok(out) {
        assert_eq!(out, expected());
    }

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[1], GradientMatrix::zeros(N_SAMPLES, N_TARGETS));

    let ciphertext: Vec<u8> = bytemuck::cast_slice::<f32, u8>(expected().as_flat())
        .iter()
        .map(|b| b ^ KEY)
        .collect();
    assert_eq!(ciphertext.len(), N_SAMPLES * N_TARGETS * 2 * size_of::<f32>());

    for (rank, plugin) in plugins.iter().enumerate() {
        let encrypted = plugin.encrypted.load(Ordering::SeqCst);
        assert_eq!(encrypted, usize::from(rank == LEADER));
        assert_eq!(*plugin.synced.lock().unwrap(), vec![ciphertext.clone()]);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn encryption_without_a_plugin_is_fatal_everywhere() {
    let out = run(group(3, config(VERTICAL_FEDERATED, true)), |mut agg| async move {
        let mut out = GradientMatrix::zeros(1, 1);
        agg.broadcast_gradient(&VERTICAL_FEDERATED, |_| Ok::<_, String>(()), &mut out)
            .await;
        out
    })
    .await;

    assert_eq!(all_aborted(out), vec![NO_ENCRYPTION; 3]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failing_encrypted_gradient_aborts_every_worker() {
    let (aggs, plugins) = encrypted_group(3, config(VERTICAL_FEDERATED, true));
    let attempts = Arc::new(AtomicUsize::new(0));

    let out = run(aggs, |mut agg| {
        let attempts = attempts.clone();
        async move {
            let mut out = GradientMatrix::zeros(2, 1);
            agg.broadcast_gradient(
                &VERTICAL_FEDERATED,
                |_| {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err("hessian is not finite")
                },
                &mut out,
            )
            .await;
            out
        }
    })
    .await;

    assert_eq!(all_aborted(out), vec!["hessian is not finite"; 3]);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);

    for plugin in plugins {
        assert_eq!(plugin.encrypted.load(Ordering::SeqCst), 0);
        assert!(plugin.synced.lock().unwrap().is_empty());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn gradient_shape_follows_the_leader() {
    let out = run(group(3, config(VERTICAL_FEDERATED, false)), |mut agg| async move {
        // Followers know neither the rows nor the targets of the leader's step.
        let mut out = GradientMatrix::zeros(0, 1);

        agg.broadcast_gradient(
            &VERTICAL_FEDERATED,
            |m| {
                *m = expected();
                Ok::<_, String>(())
            },
            &mut out,
        )
        .await;

        out
    })
    .await;

    for out in all_ok(out) {
        assert_eq!(out.n_samples(), N_SAMPLES);
        assert_eq!(out.n_targets(), N_TARGETS);
        assert_eq!(out, expected());
    }
}
