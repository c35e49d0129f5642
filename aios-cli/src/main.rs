//! AIOS control plane CLI: the one process that wires the Event Bus,
//! Scheduler, Action Queue, Circuit Breaker, Reactor, Threshold Monitor, and
//! Score Engine together and exposes their library entry points as verbs
//! (spec §6).

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

mod app;
mod commands;

use app::App;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "aios")]
#[command(about = "Autonomic control plane: event bus, scheduler, action queue, and reactor")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish an event on the bus
    Emit {
        /// Dotted event type, e.g. resource.cpu_spike
        event_type: String,
        /// Severity: info | warn | err | crit
        #[arg(long)]
        severity: Option<String>,
        /// JSON payload
        #[arg(long)]
        payload: Option<String>,
    },

    /// Submit an action to the Action Queue
    Enqueue {
        /// Action type (must have a registered executor, e.g. `shell`)
        action_type: String,
        /// Action target
        #[arg(long)]
        target: Option<String>,
        /// JSON params
        #[arg(long)]
        params: Option<String>,
        /// Priority: p0 | p1 | p2 | p3
        #[arg(long)]
        priority: Option<String>,
    },

    /// Snapshot of queues, breakers, and score
    Status {
        /// Emit machine-readable JSON instead of plain text
        #[arg(long)]
        json: bool,
    },

    /// Recent terminal actions
    History {
        /// Maximum number of actions to print
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Playbook catalog operations
    Playbooks {
        #[command(subcommand)]
        action: PlaybooksAction,
    },

    /// Circuit breaker operations
    Circuit {
        #[command(subcommand)]
        action: CircuitAction,
    },
}

#[derive(Subcommand)]
enum PlaybooksAction {
    /// List every playbook in the catalog
    List,
    /// Re-read the catalog file and report what would load
    Reload,
    /// Disable a playbook by id
    Disable {
        id: String,
    },
    /// Enable a playbook by id
    Enable {
        id: String,
    },
}

#[derive(Subcommand)]
enum CircuitAction {
    /// Show every breaker key this process has observed
    Status,
    /// Force a breaker key back to CLOSED
    Reset {
        key: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let app = App::build()?;
    app.start();

    match cli.command {
        Commands::Emit { event_type, severity, payload } => commands::emit(&app, event_type, severity, payload).await,
        Commands::Enqueue { action_type, target, params, priority } => commands::enqueue(&app, action_type, target, params, priority).await,
        Commands::Status { json } => commands::status(&app, json),
        Commands::History { limit } => commands::history(&app, limit),
        Commands::Playbooks { action } => match action {
            PlaybooksAction::List => commands::playbooks_list(&app),
            PlaybooksAction::Reload => commands::playbooks_reload(&app),
            PlaybooksAction::Disable { id } => commands::playbooks_disable(&app, &id),
            PlaybooksAction::Enable { id } => commands::playbooks_enable(&app, &id),
        },
        Commands::Circuit { action } => match action {
            CircuitAction::Status => commands::circuit_status(&app),
            CircuitAction::Reset { key } => commands::circuit_reset(&app, &key),
        },
    }
}
