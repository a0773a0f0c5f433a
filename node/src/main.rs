mod config;

use std::io;

use log::{info, warn};
use machine_learning::{
    NetworkBuilder,
    dataset::{Split, mnist},
};
use orchestra::{LogListener, Orchestrator};
use tokio::{signal, task};

use config::NodeConfig;

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();

    let config = NodeConfig::from_env()?;
    let dir = &config.mnist_dir;
    info!(
        batch_size = config.batch_size.get(), seed = config.seed;
        "loading mnist from {}", dir.display()
    );

    let train = mnist::source(dir, Split::Train, config.batch_size, Some(config.seed))
        .map_err(io::Error::other)?;
    let mut test =
        mnist::source(dir, Split::Test, config.batch_size, None).map_err(io::Error::other)?;

    let builder = NetworkBuilder::new(Some(config.seed));
    let mut orchestrator = Orchestrator::new(config.training.clone(), |id, device| {
        let replica = builder.build(&config.model)?;
        info!(slot = id; "replica placed on {device}");
        Ok(replica)
    })?
    .with_listener(LogListener::new(config.log_every));

    let token = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("received SIGINT, stopping after the batches in flight");
            token.cancel();
        }
    });

    let summary = orchestrator.run(train).await?;
    info!(
        epochs = summary.epochs.len(),
        batches = summary.batches,
        rounds = summary.averaging_rounds,
        degraded = summary.degraded.len(),
        cancelled = summary.cancelled;
        "training done in {:?}", summary.elapsed
    );

    let report = task::block_in_place(|| orchestrator.evaluate(&mut test, mnist::NUM_CLASSES))?;
    info!("evaluation\n{report}");

    Ok(())
}
