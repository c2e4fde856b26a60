//! Orca CLI - thin client for the orchestrator control plane.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;
use futures::StreamExt;
use orca::{OrcaConfig, OrchestratorClient, PlanEvent, ShutdownCoordinator, StepState, SubmitPlanRequest};

#[derive(Parser)]
#[command(name = "orca")]
#[command(about = "Orca - CLI client for the orchestrator control plane", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Orchestrator base URL; overrides the config file and ORCA_SERVER_URL
    #[arg(long, global = true)]
    server: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a goal and tail the resulting plan's events
    Run {
        /// The goal to hand to the orchestrator
        goal: String,

        /// Reuse a specific plan id instead of letting the orchestrator assign one
        #[arg(long)]
        plan_id: Option<String>,

        /// Template variable in `key=value` form (value parsed as JSON if possible), may repeat
        #[arg(long = "var", value_name = "KEY=VALUE")]
        vars: Vec<String>,
    },

    /// Tail an already-running plan's event stream
    Watch {
        /// Plan id to watch
        plan_id: String,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let shutdown = Arc::new(ShutdownCoordinator::new());
    let _signal_handler = shutdown.install_signal_handlers();

    let cli = Cli::parse();

    if let Commands::Version = cli.command {
        println!("{}", orca::version_info());
        return Ok(());
    }

    let mut config = OrcaConfig::load()?;
    if let Some(server) = cli.server {
        config.server_url = server;
    }
    let client = OrchestratorClient::new(&config)?;

    match cli.command {
        Commands::Version => unreachable!("handled above"),
        Commands::Run { goal, plan_id, vars } => {
            let variables = parse_variables(&vars)?;
            let mut request = SubmitPlanRequest::new(goal).with_variables(variables);
            if let Some(plan_id) = plan_id {
                request = request.with_plan_id(plan_id);
            }

            let submission = client.submit_plan(request).await?;
            println!(
                "{} plan {} (trace {})",
                "submitted".green().bold(),
                submission.plan_id,
                submission.trace_id
            );

            tail(&client, &submission.plan_id, shutdown).await
        }
        Commands::Watch { plan_id } => tail(&client, &plan_id, shutdown).await,
    }
}

fn parse_variables(pairs: &[String]) -> anyhow::Result<serde_json::Map<String, serde_json::Value>> {
    let mut variables = serde_json::Map::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("variable '{}' is not in key=value form", pair))?;
        let value =
            serde_json::from_str(value).unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
        variables.insert(key.to_string(), value);
    }
    Ok(variables)
}

/// Print every event on `plan_id`'s stream until the connection ends or the
/// user interrupts with Ctrl-C/SIGTERM.
async fn tail(client: &OrchestratorClient, plan_id: &str, shutdown: Arc<ShutdownCoordinator>) -> anyhow::Result<()> {
    let mut events = Box::pin(client.stream_events(plan_id).await?);

    loop {
        tokio::select! {
            _ = shutdown.wait_for_shutdown() => {
                println!("{}", "interrupted".yellow());
                return Ok(());
            }
            next = events.next() => {
                match next {
                    Some(Ok(event)) => print_event(&event),
                    Some(Err(e)) => return Err(e.into()),
                    None => return Ok(()),
                }
            }
        }
    }
}

fn print_event(event: &PlanEvent) {
    let label = match event.step.state {
        StepState::Queued => "queued".normal(),
        StepState::Running => "running".blue(),
        StepState::WaitingApproval => "waiting-approval".yellow(),
        StepState::Completed => "completed".green(),
        StepState::Failed => "failed".red(),
        StepState::DeadLettered => "dead-lettered".red().bold(),
        StepState::Rejected => "rejected".red(),
    };

    print!(
        "[{}] {} {}",
        event.occurred_at.format("%H:%M:%S"),
        label,
        event.step.action
    );
    if let Some(summary) = &event.step.summary {
        print!(" - {}", summary);
    }
    println!();
}
