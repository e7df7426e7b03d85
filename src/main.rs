use std::{env, net::SocketAddr};

use anyhow::{Context, Result};
use collective::{Aggregator, CollectiveConfig, GradientMatrix, GradientPair};
use comms::Communicator;
use log::info;
use tokio::signal;

const DEFAULT_HUB_ADDR: &str = "127.0.0.1:7070";

fn var<T>(key: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env::var(key)
        .with_context(|| format!("{key} is not set"))?
        .parse()
        .with_context(|| format!("{key} is invalid"))
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let rank: usize = var("RANK")?;
    let world_size: usize = var("WORLD_SIZE")?;
    let hub_addr: SocketAddr = env::var("HUB_ADDR")
        .unwrap_or_else(|_| DEFAULT_HUB_ADDR.to_string())
        .parse()
        .context("HUB_ADDR is invalid")?;

    let config = match env::var("COLLECTIVE_CONFIG") {
        Ok(path) => CollectiveConfig::from_path(&path).with_context(|| format!("reading {path}"))?,
        Err(_) => CollectiveConfig::from_env()?,
    };
    info!("rank {rank}/{world_size} starting with {config:?}");

    let comm = comms::tcp::connect(rank, world_size, hub_addr).await?;

    tokio::select! {
        ret = run(comm, config) => {
            ret?;
            info!("wrapping up, disconnecting...");
        }
        _ = signal::ctrl_c() => {
            info!("received SIGINT");
        }
    }

    Ok(())
}

/// One round of every operation, with per rank inputs so the reductions are visible.
async fn run<C: Communicator>(comm: C, config: CollectiveConfig) -> Result<()> {
    let info = config.partition;
    let mut agg = Aggregator::new(comm, &config);
    let rank = agg.rank() as f64;

    let max = agg.global_max(&info, rank).await;
    let ratio = agg.global_ratio(&info, rank, 1.0).await;
    info!("global max {max}, global ratio {ratio}");

    let mut sums = [rank, 1.0];
    agg.global_sum(&info, &mut sums).await?;
    info!("global sum {sums:?}");

    let mut labels = vec![0.0_f32; 4];
    agg.apply_with_labels(&info, &mut labels, |buf| {
        buf.iter_mut().enumerate().for_each(|(i, v)| *v = i as f32);
        Ok::<_, String>(())
    })
    .await;
    info!("labels {labels:?}");

    let mut gpair = GradientMatrix::zeros(4, 1);
    agg.broadcast_gradient(
        &info,
        |m| {
            for (i, p) in m.values_mut().iter_mut().enumerate() {
                *p = GradientPair::new(i as f32 * 0.5, 1.0);
            }
            Ok::<_, String>(())
        },
        &mut gpair,
    )
    .await;
    info!("gradient {:?}", gpair.values());

    Ok(())
}
