//! `sentinel` - operator entry point.
//!
//! The binary runs against the in-memory data layer and the scripted model
//! runtime (`--fixtures`), which is enough to exercise configuration,
//! scheduling and the control channel on a workstation.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use sentinel_core::config::{CONFIG_ENV, SentinelConfig};
use sentinel_core::domain::{EventRef, JobState, JobTarget};
use sentinel_core::impls::{FixtureProvider, FixtureScript, InMemoryDataLayer};
use sentinel_core::observability::init_logging;
use sentinel_core::{Sentinel, SentinelBuilder};

/// Priority-class task engine for camera events
#[derive(Parser, Debug)]
#[command(name = "sentinel", version, long_about = None)]
struct Cli {
    /// Configuration file (falls back to $SENTINEL_CONFIG)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// JSON file of scripted model answers: {"models": {"<name>": <inference>}}
    #[arg(long, global = true)]
    fixtures: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate the configuration and print the task definitions
    Check,

    /// Start the engines and serve the control channel on stdin/stdout
    Run,

    /// Run one task, wait for it and its chain, print the job records
    Inject {
        task: String,

        /// Event as node/view/YYYY-MM-DDTHH:MM:SS[#pipeline-id]
        #[arg(long, conflicts_with = "date", required_unless_present = "date")]
        event: Option<EventRef>,

        /// Day to sweep, for date-scoped tasks
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Synthetic frames recorded for `--event`
        #[arg(long, default_value_t = 10)]
        frames: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let path = cli
        .config
        .clone()
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
        .with_context(|| format!("no configuration: pass --config or set {CONFIG_ENV}"))?;
    let config = SentinelConfig::load(&path)
        .with_context(|| format!("loading {}", path.display()))?;
    init_logging(&config.logging.level, config.logging.format)?;
    tracing::debug!(config = %path.display(), "configuration loaded");

    let data = Arc::new(InMemoryDataLayer::new());
    let script = match &cli.fixtures {
        Some(path) => FixtureScript::from_json_file(path)?,
        None => FixtureScript::new(),
    };
    let builder = SentinelBuilder::new(
        config.clone(),
        data.clone(),
        Arc::new(FixtureProvider::new(script)),
    );

    match cli.command {
        Command::Check => {
            let snapshot = builder.check()?;
            for name in snapshot.names() {
                if let Some(entry) = snapshot.entry(name) {
                    println!("{}", serde_json::json!({ "task": name, "definition": entry }));
                }
            }
            println!(
                "configuration ok: {} engines, {} tasks",
                config.engines.len(),
                config.tasks.len()
            );
            Ok(())
        }
        Command::Run => serve(builder.build()?).await,
        Command::Inject {
            task,
            event,
            date,
            frames,
        } => {
            let target = match (event, date) {
                (Some(event), _) => {
                    let (width, height) = smallest_frame(&config)?;
                    data.add_event(event.clone(), frames, width, height);
                    JobTarget::Event(event)
                }
                (None, Some(date)) => JobTarget::Date(date),
                (None, None) => bail!("inject needs --event or --date"),
            };
            inject(builder.build()?, &task, target).await
        }
    }
}

/// One JSON request per stdin line, one JSON response per stdout line.
async fn serve(sentinel: Sentinel) -> Result<()> {
    let control = sentinel.control().clone();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => {
                    let mut response = control.handle_line(&line);
                    response.push('\n');
                    stdout.write_all(response.as_bytes()).await?;
                    stdout.flush().await?;
                }
                None => {
                    tracing::info!("control input closed; waiting for accepted jobs");
                    sentinel.wait_idle().await;
                    break;
                }
            },
            signal = tokio::signal::ctrl_c() => {
                signal?;
                tracing::info!("interrupt received");
                break;
            }
        }
    }

    let abandoned = sentinel.drain();
    if abandoned > 0 {
        tracing::warn!(abandoned, "queued jobs abandoned at shutdown");
    }
    sentinel.shutdown().await;
    Ok(())
}

async fn inject(sentinel: Sentinel, task: &str, target: JobTarget) -> Result<()> {
    let id = sentinel.inject(task, target)?;
    let record = sentinel
        .wait_settled(id)
        .await
        .with_context(|| format!("job {id} vanished from the ledger"))?;
    sentinel.wait_idle().await;

    for record in sentinel.dispatcher().ledger().records() {
        println!("{}", serde_json::to_string(&record)?);
    }
    sentinel.shutdown().await;

    if record.state == JobState::Failed {
        bail!(
            "job {id} failed: {}",
            record.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

/// Smallest configured frame size, used for synthetic frames.
fn smallest_frame(config: &SentinelConfig) -> Result<(u32, u32)> {
    config
        .ring_buffers
        .values()
        .flat_map(|ring| ring.sizes.iter())
        .min_by_key(|size| u64::from(size.width) * u64::from(size.height))
        .map(|size| (size.width, size.height))
        .context("no ring buffer sizes configured")
}
