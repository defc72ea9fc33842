//! cmdrack: run project commands from the terminal.
//!
//! This is the entry point of the binary. It parses command-line arguments,
//! loads the project file, and drives a `Runner` until every started command
//! has finished or the user interrupts.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::builder::styling::{AnsiColor, Effects, Style};
use clap::builder::Styles;
use clap::{Args, Parser, Subcommand};
use tokio::sync::mpsc;

use cmdrack::config::{self, Project, DEFAULT_CONFIG_FILE};
use cmdrack::logging::init_logging;
use cmdrack::output::sanitize_text;
use cmdrack::{CommandSpec, EngineEvent, RunEnv, Runner};

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Command-line interface definition.
#[derive(Debug, Parser)]
#[command(
    name = "cmdrack",
    version,
    about = "Run and stop project commands",
    styles = help_styles(),
    color = clap::ColorChoice::Always
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Path to the cmdrack.toml project file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log level (overrides CMDRACK_LOG).
    #[arg(long, value_enum, global = true)]
    log_level: Option<LogLevel>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List commands and groups of the project.
    List,
    /// Run project commands by id, or a whole group.
    Run {
        /// Command ids to run.
        ids: Vec<String>,
        /// Run the commands of this group in order, stopping at the first start failure.
        #[arg(long, conflicts_with = "ids")]
        group: Option<String>,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Run an ad-hoc command: cmdrack exec -- <cmd> [args...]
    Exec {
        /// Identifier used in output and events.
        #[arg(long, default_value = "exec")]
        id: String,
        /// Working directory.
        #[arg(long)]
        cwd: Option<String>,
        /// Output substring that marks the run as failed (repeatable).
        #[arg(long = "fail-on")]
        fail_on: Vec<String>,
        #[command(flatten)]
        output: OutputArgs,
        /// The command and its arguments.
        #[arg(last = true, required = true)]
        argv: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, Args)]
struct OutputArgs {
    /// Print engine events as JSON lines.
    #[arg(long)]
    json: bool,
    /// Strip ANSI colors from command output.
    #[arg(long)]
    no_color: bool,
}

/// What to start once the runner is up.
enum Launch {
    Each(Vec<CommandSpec>),
    Batch(Vec<CommandSpec>),
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.log_level.map(Into::into));

    match cli.command {
        Commands::List => {
            let project = load_project(cli.config.as_deref())?;
            print_project(&project);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run { ids, group, output } => {
            let project = load_project(cli.config.as_deref())?;
            let launch = match group {
                Some(name) => Launch::Batch(
                    project
                        .group(&name)
                        .ok_or_else(|| anyhow!("unknown group: {}", name))?,
                ),
                None => Launch::Each(select_commands(&project, &ids)?),
            };
            supervise(launch, &project.env, &project.base_dir, output).await
        }
        Commands::Exec {
            id,
            cwd,
            fail_on,
            output,
            argv,
        } => {
            let mut spec =
                CommandSpec::new(id, shell_words::join(&argv)).with_failure_patterns(fail_on);
            spec.working_dir = cwd;
            let base_dir = std::env::current_dir().context("failed to read current directory")?;
            supervise(Launch::Each(vec![spec]), &RunEnv::default(), &base_dir, output).await
        }
    }
}

fn load_project(path: Option<&Path>) -> Result<Project> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => {
            let default = Path::new(DEFAULT_CONFIG_FILE);
            if !default.exists() {
                bail!("no {} in the current directory (use --config)", DEFAULT_CONFIG_FILE);
            }
            default.to_path_buf()
        }
    };
    config::load_project(&path)
}

fn select_commands(project: &Project, ids: &[String]) -> Result<Vec<CommandSpec>> {
    if ids.is_empty() {
        return Ok(project.commands.clone());
    }
    let mut seen = HashSet::new();
    let mut selected = Vec::new();
    for id in ids {
        let spec = project
            .command(id)
            .ok_or_else(|| anyhow!("unknown command: {}", id))?;
        if seen.insert(id.as_str()) {
            selected.push(spec.clone());
        }
    }
    Ok(selected)
}

fn print_project(project: &Project) {
    println!("base dir: {}", project.base_dir.display());
    for command in &project.commands {
        println!("  {:<16} {:<20} {}", command.id, command.name, command.command_line);
    }
    for group in &project.groups {
        println!("group {}: {}", group.name, group.commands.join(", "));
    }
}

/// Starts the commands and prints events until every started command finishes.
async fn supervise(
    launch: Launch,
    env: &RunEnv,
    base_dir: &Path,
    output: OutputArgs,
) -> Result<ExitCode> {
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let runner = Runner::new(Arc::new(event_tx));
    let mut failed = false;

    let commands = match &launch {
        Launch::Each(commands) | Launch::Batch(commands) => commands,
    };
    let names: HashMap<String, String> = commands
        .iter()
        .map(|c| (c.id.clone(), c.name.clone()))
        .collect();

    match launch {
        Launch::Each(commands) => {
            for spec in &commands {
                if runner.run(spec, env, base_dir).await.is_err() {
                    failed = true;
                }
            }
        }
        Launch::Batch(commands) => {
            if runner.run_batch(&commands, env, base_dir).await.is_err() {
                failed = true;
            }
        }
    }

    // `run` emits ProcessStarted before returning, so every start is already queued.
    let mut live: HashSet<String> = HashSet::new();
    while let Ok(event) = event_rx.try_recv() {
        failed |= track_event(&event, &mut live);
        print_event(&event, &names, output);
    }

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut stopping = false;
    while !live.is_empty() {
        tokio::select! {
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                failed |= track_event(&event, &mut live);
                print_event(&event, &names, output);
            }
            _ = &mut shutdown, if !stopping => {
                stopping = true;
                tracing::info!("interrupted; stopping all commands");
                for err in runner.stop_all().await {
                    eprintln!("{}", err);
                    failed = true;
                }
            }
        }
    }

    Ok(if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

/// Updates the set of live command ids; returns true for a failure signal.
fn track_event(event: &EngineEvent, live: &mut HashSet<String>) -> bool {
    match event {
        EngineEvent::ProcessStarted { id } => {
            live.insert(id.clone());
        }
        EngineEvent::ProcessFinished { id } => {
            live.remove(id);
        }
        EngineEvent::FailureDetected { .. } => return true,
        EngineEvent::NewLogEntry { .. } => {}
    }
    false
}

fn print_event(event: &EngineEvent, names: &HashMap<String, String>, output: OutputArgs) {
    if output.json {
        match serde_json::to_string(event) {
            Ok(json) => println!("{}", json),
            Err(err) => tracing::debug!(error = %err, "failed to encode event"),
        }
        return;
    }
    let id = event.id();
    let name = names.get(id).map(String::as_str).unwrap_or(id);
    match event {
        EngineEvent::ProcessStarted { .. } => eprintln!("[{}] started", name),
        EngineEvent::ProcessFinished { .. } => eprintln!("[{}] finished", name),
        EngineEvent::FailureDetected { .. } => eprintln!("[{}] failure detected", name),
        EngineEvent::NewLogEntry { line, .. } => {
            println!("[{}] {}", name, sanitize_text(line, output.no_color))
        }
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn help_styles() -> Styles {
    Styles::styled()
        .header(
            Style::new()
                .fg_color(Some(AnsiColor::Cyan.into()))
                .effects(Effects::BOLD),
        )
        .usage(
            Style::new()
                .fg_color(Some(AnsiColor::Green.into()))
                .effects(Effects::BOLD),
        )
        .literal(Style::new().fg_color(Some(AnsiColor::Yellow.into())))
        .placeholder(Style::new().fg_color(Some(AnsiColor::Magenta.into())))
        .valid(Style::new().fg_color(Some(AnsiColor::Green.into())))
        .invalid(
            Style::new()
                .fg_color(Some(AnsiColor::Red.into()))
                .effects(Effects::BOLD),
        )
}
