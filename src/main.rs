//! FindMy Tracker - Main Entry Point
//!
//! Sets up the account session once, then tracks the accessory from the
//! stored entry.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::{error, info, warn};

use findmy_tracker_lib::{
    config::{self, TrackerEntry, ENTRY_KEY},
    logging,
    storage::{SecureStorage, StorageError},
    DeviceTracker, LoginOutcome, TrackerHub, UpdateScheduler,
};

#[derive(Parser)]
#[command(name = "findmy-tracker", version, about = "Track a Find My accessory")]
struct Cli {
    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in and store the account session and accessory
    Setup {
        /// Anisette/report gateway URL
        #[arg(long, env = "FINDMY_URL", default_value = config::DEFAULT_URL)]
        url: String,

        /// Account email
        #[arg(long)]
        email: String,

        /// Accessory export file (JSON)
        #[arg(long)]
        accessory: PathBuf,

        /// Account password, prompted for when absent
        #[arg(long, env = "FINDMY_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Poll the stored accessory until interrupted
    Track {
        /// Polling period in seconds
        #[arg(long, env = "FINDMY_UPDATE_INTERVAL")]
        interval: Option<u64>,
    },
    /// Delete the stored entry
    Forget,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    logging::init(cli.verbose);
    info!("FindMy Tracker starting...");

    let storage = SecureStorage::new();

    let result = match cli.command {
        Command::Setup { url, email, accessory, password } => {
            setup(&storage, &url, &email, &accessory, password).await
        }
        Command::Track { interval } => track(&storage, interval).await,
        Command::Forget => forget(&storage),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn setup(
    storage: &SecureStorage,
    url: &str,
    email: &str,
    accessory_path: &Path,
    password: Option<String>,
) -> Result<()> {
    let url = config::parse_url(url)?;
    let accessory_blob = std::fs::read_to_string(accessory_path)
        .with_context(|| format!("reading {}", accessory_path.display()))?;

    let mut prompt = Prompt::new();
    let password = match password {
        Some(password) => password,
        None => prompt.ask("Password: ").await?,
    };

    let mut hub = TrackerHub::new(&url)?;

    match hub.begin(email, &password).await? {
        LoginOutcome::Authenticated => {}
        LoginOutcome::SecondFactorRequired => {
            let methods = hub.list_second_factor_methods().await?;
            if methods.is_empty() {
                bail!("no supported second factor method offered");
            }

            for method in &methods {
                println!("  [{}] {}", method.index, method.label);
            }
            let index: usize = prompt
                .ask("Second factor method: ")
                .await?
                .parse()
                .context("method must be a number")?;

            hub.request_second_factor(index).await?;

            let code = prompt.ask("Code: ").await?;
            if hub.submit_second_factor(index, &code).await? != LoginOutcome::Authenticated {
                bail!("invalid second factor code");
            }
        }
        LoginOutcome::InvalidCredentials | LoginOutcome::InvalidSecondFactor => {
            bail!("invalid credentials");
        }
    }

    let accessory = hub.load_accessory(&accessory_blob)?;
    println!("Tracking {} ({})", accessory.name(), accessory.identifier());

    let entry = TrackerEntry {
        url,
        email: email.to_string(),
        account: hub.export_credentials()?,
        accessory: accessory_blob,
    };
    storage.save(ENTRY_KEY, &entry)?;

    info!("Setup complete for {}", email);
    Ok(())
}

async fn track(storage: &SecureStorage, interval: Option<u64>) -> Result<()> {
    let interval = config::update_interval(interval)?;
    let entry: TrackerEntry = match storage.load(ENTRY_KEY) {
        Ok(entry) => entry,
        Err(StorageError::NotFound(_)) => bail!(
            "nothing set up yet in {}, run `findmy-tracker setup`",
            storage.path().display()
        ),
        Err(e) => return Err(e.into()),
    };

    let mut hub = TrackerHub::new(&entry.url)?;
    hub.restore_credentials(entry.account)?;
    hub.load_accessory(&entry.accessory)?;

    let hub = Arc::new(hub);
    let mut scheduler = UpdateScheduler::new(hub.clone(), interval);
    let accessory = hub.accessory().context("accessory missing after load")?;
    let mut tracker = DeviceTracker::new(accessory, scheduler.subscribe());

    info!("Tracking {} for {}", tracker.name(), entry.email);
    scheduler.start().await;
    report(&tracker);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping");
                break;
            }
            changed = tracker.changed() => {
                if !changed {
                    break;
                }
                report(&tracker);
            }
        }
    }

    scheduler.shutdown().await;
    Ok(())
}

fn forget(storage: &SecureStorage) -> Result<()> {
    storage.delete(ENTRY_KEY)?;
    println!("Stored entry removed");
    Ok(())
}

fn report(tracker: &DeviceTracker) {
    let summary = tracker.summary();
    match serde_json::to_string(&summary) {
        Ok(line) => println!("{}", line),
        Err(e) => warn!("Failed to render tracker state: {}", e),
    }
}

/// Line prompts on stdin
struct Prompt {
    lines: Lines<BufReader<Stdin>>,
}

impl Prompt {
    fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }

    async fn ask(&mut self, question: &str) -> Result<String> {
        print!("{}", question);
        std::io::stdout().flush()?;

        match self.lines.next_line().await? {
            Some(line) => Ok(line.trim().to_string()),
            None => bail!("stdin closed"),
        }
    }
}
