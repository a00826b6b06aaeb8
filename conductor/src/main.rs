//! Task orchestration CLI.
//!
//! Classifies a natural-language task, routes it to a domain workflow and
//! drives the plan/execute/reflect loop behind the safety gate. Progress
//! events are written to stdout as JSON lines; diagnostics go to stderr.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;

use conductor::core::stats::StatsHandles;
use conductor::core::types::{AccessMode, Domain, SafetyDecision};
use conductor::events::JsonLinesSink;
use conductor::exit_codes;
use conductor::intent::IntentClassifier;
use conductor::io::config::{
    AppConfig, CONFIG_ENV, DEFAULT_CONFIG_FILE, load_config_with_env, write_config,
};
use conductor::io::llm::OpenAiClient;
use conductor::io::tools::LocalTools;
use conductor::logging;
use conductor::orchestrator::{Orchestrator, RunError};
use conductor::safety::SafetyGate;

#[derive(Parser)]
#[command(
    name = "conductor",
    version,
    about = "Route tasks to domain workflows and run them behind a safety gate"
)]
struct Cli {
    /// Config file. Defaults to `$CONDUCTOR_CONFIG`, then `conductor.toml`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config file if missing.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Classify a task, run it, and stream progress events to stdout.
    Run {
        /// Task description.
        task: String,
        /// Session id used for cancellation.
        #[arg(long, default_value = "cli")]
        session: String,
        /// Skip classification and use this domain.
        #[arg(long)]
        domain: Option<Domain>,
        /// Directory the tools operate in. Defaults to the current directory.
        #[arg(long)]
        workspace: Option<PathBuf>,
        /// Print aggregate statistics to stderr when the run ends.
        #[arg(long)]
        stats: bool,
    },
    /// Print the domain a task would be routed to.
    Classify {
        /// Task description.
        task: String,
    },
    /// Ask the safety gate whether a shell command may run.
    CheckCommand {
        command: String,
    },
    /// Ask the safety gate whether a path may be read (or written).
    CheckPath {
        path: String,
        /// Check write access instead of read access.
        #[arg(long)]
        write: bool,
    },
}

#[tokio::main]
async fn main() {
    logging::init();
    let code = match run(Cli::parse()).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let config_path = config_path(cli.config);
    match cli.command {
        Command::Init { force } => cmd_init(&config_path, force),
        Command::Run {
            task,
            session,
            domain,
            workspace,
            stats,
        } => {
            let config = load(&config_path)?;
            cmd_run(&config, &task, &session, domain, workspace, stats).await
        }
        Command::Classify { task } => cmd_classify(&load(&config_path)?, &task).await,
        Command::CheckCommand { command } => {
            let gate = SafetyGate::new(&load(&config_path)?.safety)?;
            print_decision(&gate.check_command(&command))
        }
        Command::CheckPath { path, write } => {
            let gate = SafetyGate::new(&load(&config_path)?.safety)?;
            let mode = if write {
                AccessMode::Write
            } else {
                AccessMode::Read
            };
            print_decision(&gate.check_file_access(&path, mode))
        }
    }
}

fn config_path(flag: Option<PathBuf>) -> PathBuf {
    flag.or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

fn load(path: &Path) -> Result<AppConfig> {
    load_config_with_env(path, |key| std::env::var(key).ok())
        .with_context(|| format!("load config {}", path.display()))
}

fn cmd_init(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &AppConfig::default())?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

fn llm_client(config: &AppConfig) -> Result<OpenAiClient> {
    let api_key = config.llm.api_key(|key| std::env::var(key).ok());
    OpenAiClient::new(&config.llm, api_key).context("build llm client")
}

async fn cmd_run(
    config: &AppConfig,
    task: &str,
    session: &str,
    domain: Option<Domain>,
    workspace: Option<PathBuf>,
    print_stats: bool,
) -> Result<i32> {
    let workspace = match workspace {
        Some(dir) => dir
            .canonicalize()
            .with_context(|| format!("resolve workspace {}", dir.display()))?,
        None => std::env::current_dir().context("resolve working directory")?,
    };
    let stats = StatsHandles::global();
    let gate = Arc::new(
        SafetyGate::with_context(
            &config.safety,
            dirs::home_dir(),
            &workspace,
            Arc::clone(&stats.safety),
        )
        .context("build safety gate")?,
    );
    let orchestrator = Arc::new(Orchestrator::from_config(
        config,
        Arc::clone(&gate),
        Arc::new(llm_client(config)?),
        Arc::new(LocalTools::new(gate)),
        stats,
    ));
    let sink = JsonLinesSink::new(std::io::stdout());

    let interrupt = {
        let orchestrator = Arc::clone(&orchestrator);
        let session = session.to_string();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                orchestrator.cancel(&session);
            }
        })
    };
    let outcome = match domain {
        Some(domain) => {
            orchestrator
                .execute_with_domain(task, domain, session, &sink)
                .await
        }
        None => orchestrator.execute_task(task, session, &sink).await,
    };
    interrupt.abort();

    if print_stats {
        let stats = serde_json::to_string_pretty(&orchestrator.get_stats())
            .context("serialize statistics")?;
        eprintln!("{stats}");
    }
    orchestrator.close();

    Ok(match outcome {
        Ok(result) if result.success => exit_codes::OK,
        Ok(_) => exit_codes::FAILED,
        Err(RunError::Cancelled | RunError::TimedOut) => exit_codes::INTERRUPTED,
    })
}

async fn cmd_classify(config: &AppConfig, task: &str) -> Result<i32> {
    let classifier = IntentClassifier::new(
        Arc::new(llm_client(config)?),
        config.classifier.clone(),
        StatsHandles::global().classifier,
    );
    let result = classifier.classify(task).await;
    print_json(&result)?;
    Ok(exit_codes::OK)
}

fn print_decision(decision: &SafetyDecision) -> Result<i32> {
    print_json(decision)?;
    Ok(if decision.allowed {
        exit_codes::OK
    } else {
        exit_codes::FAILED
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("serialize output")?;
    println!("{json}");
    Ok(())
}
