use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "debtwatch")]
#[command(about = "debtwatch queue worker", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Consume the durable queue until stopped, the queue closes, or a message fails
    Worker(WorkerArgs),
    /// Append messages to the durable queue, one per non-empty line
    ///
    /// The queue directory is locked by whichever process opens it first, so
    /// this fails while a worker is running on the same `queue.path`. Stop
    /// the worker, publish, then start it again.
    Publish(PublishArgs),
    /// Print the number of unacknowledged messages in the durable queue
    ///
    /// Like `publish`, this needs the queue directory to be free.
    Pending,
}

#[derive(clap::Args, Debug)]
pub struct WorkerArgs {
    /// Override worker.concurrency
    #[arg(long)]
    pub concurrency: Option<usize>,
}

#[derive(clap::Args, Debug)]
pub struct PublishArgs {
    /// File to read messages from (stdin when omitted)
    pub file: Option<PathBuf>,
}
