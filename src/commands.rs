use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

use debtwatch::config::Config;
use debtwatch::processors::{self, AnyError};
use debtwatch::queue::{FjallQueue, QueueSource};
use debtwatch::server;
use debtwatch::WorkerPool;

use crate::cli::{PublishArgs, WorkerArgs};

fn open_queue(config: &Config) -> Result<Arc<FjallQueue>, AnyError> {
    let queue = FjallQueue::open(
        &config.queue.path,
        config.queue.name.clone(),
        config.queue.channel_capacity,
    )
    .map_err(|e| format!("Failed to open queue at {}: {}", config.queue.path.display(), e))?;
    Ok(Arc::new(queue))
}

pub async fn worker(config: Config, args: WorkerArgs) -> Result<(), AnyError> {
    let mut pool_config = config.worker.pool_config();
    if let Some(concurrency) = args.concurrency {
        pool_config.max_inflight_tasks = concurrency;
    }

    let processor = processors::build_processor(&config.processor)?;
    let queue = open_queue(&config)?;
    let pool = WorkerPool::new(queue.clone(), processor, pool_config)?;
    let handle = pool.handle();

    // Translate Ctrl+C / SIGTERM into a cooperative stop
    let signal_handle = handle.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = server::shutdown_signal() => {
                signal_handle.stop();
            }
            _ = signal_handle.wait_stopped() => {}
        }
    });

    let health = config
        .server
        .enabled
        .then(|| tokio::spawn(server::run(config.server.bind_addr, handle.clone())));

    let result = pool.start().await;

    // Every task has finished, so the connection can be released
    queue.close().await?;

    if let Some(health) = health {
        match health.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Health endpoint failed"),
            Err(e) => warn!(error = %e, "Health endpoint task ended abnormally"),
        }
    }

    let report = result?;
    if !report.is_clean() {
        return Err(format!("worker pool stopped: {}", report.reason).into());
    }

    Ok(())
}

pub async fn publish(config: Config, args: PublishArgs) -> Result<(), AnyError> {
    let input = match &args.file {
        Some(path) => tokio::fs::read_to_string(path).await?,
        None => {
            let mut buffer = String::new();
            tokio::io::stdin().read_to_string(&mut buffer).await?;
            buffer
        }
    };

    let queue = open_queue(&config)?;
    let mut published = 0usize;

    for line in input.lines().map(str::trim).filter(|line| !line.is_empty()) {
        queue.publish(line)?;
        published += 1;
    }

    queue.close().await?;
    info!(queue = %config.queue.name, published, "Messages published");

    Ok(())
}

pub fn pending(config: Config) -> Result<(), AnyError> {
    let queue = open_queue(&config)?;
    println!("{}", queue.pending()?);
    Ok(())
}
