use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use coordination::spawn::{JsonFileLedger, SpawnLedger};
use swarm_dispatch::config::DispatchConfig;
use swarm_dispatch::dispatcher::Dispatcher;
use swarm_dispatch::gh_bridge::GhCliTracker;
use swarm_dispatch::sweep;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Drive tracker issues from clarifying questions to agent spawn to completion
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config file overlaying DISPATCH_* environment defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Repository as OWNER/NAME (overrides DISPATCH_REPO)
    #[arg(long, global = true)]
    repo: Option<String>,

    /// Spawn ledger path (overrides DISPATCH_LEDGER_PATH)
    #[arg(long, global = true)]
    ledger: Option<PathBuf>,

    /// Analyze and print planned mutations without writing anything
    #[arg(long, global = true, default_value_t = false)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Handle one webhook delivery
    HandleEvent {
        /// Event name (defaults to $GITHUB_EVENT_NAME)
        #[arg(long)]
        name: Option<String>,
        /// JSON payload file (defaults to $GITHUB_EVENT_PATH)
        #[arg(long)]
        payload: Option<PathBuf>,
    },
    /// Evaluate one issue, or every open issue
    Trigger {
        #[arg(long, conflicts_with = "all", required_unless_present = "all")]
        issue: Option<u64>,
        #[arg(long, default_value_t = false)]
        all: bool,
    },
    /// Signal that an agent started work on an issue
    Start {
        #[arg(long)]
        issue: u64,
    },
    /// Run the completion handler for a closed pull request
    Complete {
        #[arg(long)]
        pr: u64,
    },
    /// Print the issue the scheduler would pick next
    Next,
    /// Sweep all open issues periodically until Ctrl-C
    Watch,
    /// Print the readiness report for an issue
    Analyze {
        #[arg(long)]
        issue: u64,
    },
    /// List the spawn triggers posted on an issue
    Triggers {
        #[arg(long)]
        issue: u64,
    },
    /// Inspect or reset the spawn ledger
    #[command(subcommand)]
    Ledger(LedgerCmd),
}

#[derive(Subcommand, Debug)]
enum LedgerCmd {
    /// List every spawn record
    List,
    /// Forget the spawn record of an issue so it can spawn again
    Reset {
        #[arg(long)]
        issue: u64,
    },
}

fn load_config(args: &Args) -> Result<DispatchConfig> {
    let mut config = DispatchConfig::load(args.config.as_deref())?;
    if let Some(repo) = &args.repo {
        config.repo = Some(repo.clone());
    }
    if let Some(ledger) = &args.ledger {
        config.ledger_path = ledger.clone();
    }
    config.dry_run = args.dry_run;
    Ok(config)
}

fn read_event(name: Option<String>, payload: Option<PathBuf>) -> Result<(String, serde_json::Value)> {
    let name = match name {
        Some(name) => name,
        None => std::env::var("GITHUB_EVENT_NAME")
            .context("No --name given and GITHUB_EVENT_NAME is not set")?,
    };
    let path = match payload {
        Some(path) => path,
        None => std::env::var("GITHUB_EVENT_PATH")
            .map(PathBuf::from)
            .context("No --payload given and GITHUB_EVENT_PATH is not set")?,
    };
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read event payload {}", path.display()))?;
    let payload = serde_json::from_str(&raw)
        .with_context(|| format!("Event payload {} is not JSON", path.display()))?;
    Ok((name, payload))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    info!(
        repo = config.repo.as_deref().unwrap_or("<current>"),
        ledger = %config.ledger_path.display(),
        dry_run = config.dry_run,
        "swarm-dispatch starting"
    );

    let ledger = JsonFileLedger::open(&config.ledger_path).shared();

    let tracker = Arc::new(GhCliTracker::new(config.gh_bin.clone(), config.repo.clone()));
    let dispatcher = Dispatcher::new(tracker, ledger.clone(), &config);

    match args.command {
        Command::HandleEvent { name, payload } => {
            let (name, payload) = read_event(name, payload)?;
            let outcome = dispatcher
                .handle_payload(&name, &payload)
                .await
                .with_context(|| format!("Failed to handle `{name}` event"))?;
            println!("{}", outcome.describe());
        }
        Command::Trigger { issue: Some(issue), .. } => {
            let outcome = dispatcher
                .evaluate(issue, false)
                .await
                .with_context(|| format!("Failed to evaluate #{issue}"))?;
            println!("{}", outcome.describe());
        }
        Command::Trigger { issue: None, .. } => {
            let report = sweep::sweep(&dispatcher, &CancellationToken::new())
                .await
                .context("Sweep failed")?;
            for outcome in &report.outcomes {
                println!("{}", outcome.describe());
            }
            for (issue, err) in &report.failed {
                println!("#{issue}: failed: {err}");
            }
            println!("{}", report.summary());
            anyhow::ensure!(report.failed.is_empty(), "{} issue(s) failed", report.failed.len());
        }
        Command::Start { issue } => {
            let outcome = dispatcher
                .work_started(issue)
                .await
                .with_context(|| format!("Failed to mark #{issue} in progress"))?;
            println!("{}", outcome.describe());
        }
        Command::Complete { pr } => {
            let outcome = dispatcher
                .complete_pull_request(pr)
                .await
                .with_context(|| format!("Failed to complete PR #{pr}"))?;
            println!("{}", outcome.describe());
        }
        Command::Next => match dispatcher.next_issue().await? {
            Some(issue) => println!(
                "#{}\t{}\t{}",
                issue.id,
                coordination::PriorityClass::from_labels(&issue.labels),
                issue.title
            ),
            None => println!("idle: no ready work"),
        },
        Command::Watch => {
            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Ctrl-C received, finishing current issue");
                    on_signal.cancel();
                }
            });
            sweep::watch(&dispatcher, config.poll_interval, cancel).await?;
        }
        Command::Analyze { issue } => {
            let (snapshot, report) = dispatcher.inspect(issue).await?;
            let state = coordination::infer_state(&snapshot.labels, Some(&report));
            println!("#{} {} [{}]", snapshot.id, snapshot.title, snapshot.status);
            println!("state: {}", state.state);
            if let Some(conflict) = state.conflict {
                println!("warning: {conflict}");
            }
            println!("{}", report.summary());
        }
        Command::Triggers { issue } => {
            let triggers = dispatcher.triggers(issue).await?;
            if triggers.is_empty() {
                println!("#{issue}: no spawn triggers");
            }
            for trigger in triggers {
                println!(
                    "{}\t{}\tgeneration {}\t{}",
                    trigger.timestamp.to_rfc3339(),
                    trigger.agent_type,
                    trigger.state.generation,
                    trigger.state.spawn_id
                );
            }
        }
        Command::Ledger(LedgerCmd::List) => {
            let records = ledger.list().context("Failed to read spawn ledger")?;
            if records.is_empty() {
                println!("(no spawn records)");
            }
            for (issue, record) in records {
                println!(
                    "#{issue}\tgeneration {}\t{}\t{}",
                    record.generation,
                    record.timestamp.to_rfc3339(),
                    record.spawn_id
                );
            }
        }
        Command::Ledger(LedgerCmd::Reset { issue }) => {
            if config.dry_run {
                println!("would reset spawn record of #{issue}");
            } else {
                match ledger.reset(issue).context("Failed to update spawn ledger")? {
                    Some(old) => println!("#{issue}: removed generation {}", old.generation),
                    None => println!("#{issue}: no spawn record"),
                }
            }
        }
    }

    Ok(())
}
