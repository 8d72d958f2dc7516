//! linkpost: scheduled LinkedIn posting.
//!
//! Main binary with subcommands:
//! - `serve`: HTTP API plus the background dispatcher
//! - `tick`: run one dispatcher pass and exit
//! - `jobs`: list scheduled posts
//! - `clear`: delete every scheduled post
//! - `requeue`: put a failed post back in the queue

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use linkpost_scheduler::timestamp::{format_timestamp, parse_run_at};
use linkpost_scheduler::{
    DEFAULT_BATCH_LIMIT, DEFAULT_POLL_INTERVAL, DEFAULT_POST_TIMEOUT, DispatcherConfig, JobStore,
};
use linkpost_voyager::DEFAULT_VOYAGER_URL;

mod serve;

#[derive(Parser)]
#[command(name = "linkpost")]
#[command(about = "Schedule LinkedIn posts and publish them on time", long_about = None)]
struct Cli {
    /// SQLite database path
    #[arg(long, global = true, env = "SCHEDULE_DB_PATH", default_value = "schedule.db")]
    db: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API and run the dispatcher
    Serve {
        /// HTTP listen address
        #[arg(long, env = "LINKPOST_LISTEN", default_value = "0.0.0.0:5000")]
        listen: String,

        #[command(flatten)]
        dispatch: DispatchArgs,
    },

    /// Run a single dispatcher tick and exit
    Tick {
        #[command(flatten)]
        dispatch: DispatchArgs,
    },

    /// List scheduled posts, newest first
    Jobs {
        /// Maximum number of posts to show
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Delete every scheduled post regardless of status
    Clear,

    /// Put a failed post back in the queue
    Requeue {
        /// Post id
        id: i64,

        /// New run time (ISO-8601); defaults to now
        #[arg(long)]
        run_at: Option<String>,
    },
}

/// Options shared by everything that runs the dispatcher.
#[derive(Args, Debug, Clone)]
struct DispatchArgs {
    /// Seconds to sleep between dispatcher ticks
    #[arg(long, env = "LINKPOST_POLL_INTERVAL", default_value_t = DEFAULT_POLL_INTERVAL.as_secs())]
    poll_interval: u64,

    /// Maximum due posts handled per tick
    #[arg(long, env = "LINKPOST_BATCH_LIMIT", default_value_t = DEFAULT_BATCH_LIMIT)]
    batch_limit: usize,

    /// Seconds before an in-flight post is abandoned as failed
    #[arg(long, env = "LINKPOST_POST_TIMEOUT", default_value_t = DEFAULT_POST_TIMEOUT.as_secs())]
    post_timeout: u64,

    /// Fail posts stuck in processing for longer than this many seconds.
    /// Must exceed the post timeout by more than 30 seconds. Disabled when
    /// unset.
    #[arg(long, env = "LINKPOST_STALE_AFTER")]
    stale_after: Option<u64>,

    /// Voyager API base URL
    #[arg(long, env = "LINKPOST_VOYAGER_URL", default_value = DEFAULT_VOYAGER_URL)]
    voyager_url: String,
}

impl DispatchArgs {
    fn config(&self) -> Result<DispatcherConfig> {
        let config = DispatcherConfig {
            poll_interval: Duration::from_secs(self.poll_interval),
            batch_limit: self.batch_limit,
            post_timeout: Duration::from_secs(self.post_timeout),
            stale_after: self.stale_after.map(Duration::from_secs),
        };
        config.validate().map_err(|e| miette::miette!("{}", e))?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| {
                "linkpost=info,linkpost_scheduler=info,linkpost_web=info,linkpost_voyager=info"
                    .to_string()
            }),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let store = Arc::new(
        JobStore::open(&cli.db).map_err(|e| miette::miette!("failed to open job store: {}", e))?,
    );

    match cli.command {
        Commands::Serve { listen, dispatch } => serve::run(store, &listen, &dispatch).await,
        Commands::Tick { dispatch } => serve::tick_once(store, &dispatch).await,
        Commands::Jobs { limit } => list_jobs(&store, limit),
        Commands::Clear => {
            let removed = store.clear_all().map_err(|e| miette::miette!("{}", e))?;
            println!("cleared {} scheduled posts", removed);
            Ok(())
        }
        Commands::Requeue { id, run_at } => requeue(&store, id, run_at.as_deref()),
    }
}

fn list_jobs(store: &JobStore, limit: usize) -> Result<()> {
    let jobs = store.list(limit).map_err(|e| miette::miette!("{}", e))?;

    if jobs.is_empty() {
        println!("no scheduled posts");
        return Ok(());
    }

    for job in jobs {
        let preview: String = job.text.chars().take(60).collect();
        println!(
            "{:>6}  {:<10}  {}  {}",
            job.id,
            job.status,
            format_timestamp(job.run_at),
            preview.replace('\n', " ")
        );
        if let Some(error) = job.last_error {
            println!("        error: {}", error);
        }
    }

    Ok(())
}

fn requeue(store: &JobStore, id: i64, run_at: Option<&str>) -> Result<()> {
    let run_at = match run_at {
        Some(raw) => parse_run_at(raw).map_err(|e| miette::miette!("{}", e))?,
        None => Utc::now(),
    };

    if store
        .requeue(id, run_at)
        .map_err(|e| miette::miette!("{}", e))?
    {
        println!("requeued post {} for {}", id, format_timestamp(run_at));
        Ok(())
    } else {
        Err(miette::miette!(
            "post {} was not requeued: it does not exist or has not failed",
            id
        ))
    }
}
