//! # FlowPilot: pipeline scheduler & runner
//!
//! Runs generated data pipelines on demand or on a schedule.
//!
//! Usage:
//!   flowpilot serve                              # Run the dispatcher until Ctrl-C
//!   flowpilot run <flow-id>                      # Run a flow and stream its log
//!   flowpilot flows add orders ./orders --ready  # Register a flow
//!   flowpilot schedules add daily <flow-id> 09:00
//!   flowpilot schedules next -n 5

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use flowpilot_core::traits::FlowStore;
use flowpilot_core::{FlowPilotConfig, FlowRunner, FlowStatus, JsonFlowStore};
use flowpilot_executor::{JobExecutor, LogStream};
use flowpilot_scheduler::{
    Dispatcher, ScheduleConfig, ScheduleRegistry, ScheduleStore, ScheduleUpdate,
};

#[derive(Parser)]
#[command(
    name = "flowpilot",
    version,
    about = "🛫 FlowPilot: schedule and run data pipelines"
)]
struct Cli {
    /// Config file (default: ~/.flowpilot/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the dispatcher and run scheduled flows until Ctrl-C
    Serve,
    /// Run one flow now and stream its log
    Run {
        flow_id: String,
    },
    /// Write the default config file
    Init,
    /// Manage flows
    #[command(subcommand)]
    Flows(FlowsCommand),
    /// Manage schedules
    #[command(subcommand)]
    Schedules(SchedulesCommand),
}

#[derive(Subcommand)]
enum FlowsCommand {
    /// List flows
    List,
    /// Register a generated pipeline project
    Add {
        name: String,
        project_path: PathBuf,
        /// Mark the flow ready to run right away
        #[arg(long)]
        ready: bool,
    },
    /// Mark a flow ready to run
    Ready { flow_id: String },
    /// Remove a flow
    Delete { flow_id: String },
}

#[derive(Subcommand)]
enum SchedulesCommand {
    /// List all schedules, soonest first
    List,
    /// Show upcoming runs
    Next {
        #[arg(short, default_value = "10")]
        n: usize,
    },
    /// Create a schedule
    #[command(subcommand)]
    Add(AddSchedule),
    /// Edit a schedule
    Update(UpdateArgs),
    /// Delete a schedule
    Delete { schedule_id: String },
    /// Enable/disable a schedule
    Toggle { schedule_id: String },
}

#[derive(Subcommand)]
enum AddSchedule {
    /// Every day at TIME
    Daily {
        flow_id: String,
        time: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// On the given weekdays at TIME
    Weekly {
        flow_id: String,
        time: String,
        #[arg(long, value_delimiter = ',', required = true)]
        days: Vec<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// On explicit dates (YYYY-MM-DD)
    Dates {
        flow_id: String,
        time: String,
        #[arg(long, value_delimiter = ',', required = true)]
        dates: Vec<String>,
        /// Per-date times, e.g. --at 2025-03-01=08:00,18:00
        #[arg(long = "at")]
        date_times: Vec<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Weekly or daily inside a date range
    Custom {
        flow_id: String,
        time: String,
        #[arg(long, value_delimiter = ',')]
        days: Vec<String>,
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Every N minutes inside a daily window
    Interval {
        flow_id: String,
        minutes: u32,
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
        #[arg(long, value_delimiter = ',')]
        days: Vec<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Several times a day
    Times {
        flow_id: String,
        #[arg(long, value_delimiter = ',', required = true)]
        times: Vec<String>,
        #[arg(long, value_delimiter = ',')]
        days: Vec<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Different times per weekday, e.g. --day monday=09:00,15:00
    DayTimes {
        flow_id: String,
        #[arg(long = "day", required = true)]
        day_times: Vec<String>,
        #[arg(long)]
        description: Option<String>,
    },
}

#[derive(Args)]
struct UpdateArgs {
    schedule_id: String,
    #[arg(long)]
    time: Option<String>,
    #[arg(long, value_delimiter = ',')]
    times: Option<Vec<String>>,
    #[arg(long, value_delimiter = ',')]
    days: Option<Vec<String>>,
    #[arg(long = "day")]
    day_times: Vec<String>,
    #[arg(long)]
    start: Option<String>,
    #[arg(long)]
    end: Option<String>,
    #[arg(long)]
    interval: Option<u32>,
    #[arg(long)]
    window_start: Option<String>,
    #[arg(long)]
    window_end: Option<String>,
    #[arg(long)]
    description: Option<String>,
}

/// Everything a command may need, wired from the config.
struct App {
    config: FlowPilotConfig,
    flows: Arc<JsonFlowStore>,
}

impl App {
    fn open(config: FlowPilotConfig) -> Self {
        let flows = Arc::new(JsonFlowStore::open(&config.flows_path()));
        Self { config, flows }
    }

    fn flow_store(&self) -> Arc<dyn FlowStore> {
        Arc::clone(&self.flows) as Arc<dyn FlowStore>
    }

    fn registry(&self) -> Arc<ScheduleRegistry> {
        let store = ScheduleStore::new(&self.config.schedules_path());
        Arc::new(ScheduleRegistry::new(store, self.flow_store()))
    }

    fn executor(&self) -> Result<JobExecutor> {
        Ok(JobExecutor::new(self.flow_store(), self.config.executor.clone())?)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "flowpilot=debug,flowpilot_core=debug,flowpilot_scheduler=debug,flowpilot_executor=debug"
    } else {
        "flowpilot=info,flowpilot_core=info,flowpilot_scheduler=info,flowpilot_executor=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => FlowPilotConfig::load_from(path)?,
        None => FlowPilotConfig::load()?,
    };

    if let Command::Init = cli.command {
        config.save()?;
        println!("✅ Config written to {}", FlowPilotConfig::default_path().display());
        return Ok(());
    }

    let app = App::open(config);
    match cli.command {
        Command::Init => {}
        Command::Serve => serve(&app).await?,
        Command::Run { flow_id } => run_flow(&app, &flow_id).await?,
        Command::Flows(cmd) => flows(&app, cmd)?,
        Command::Schedules(cmd) => schedules(&app, cmd)?,
    }
    Ok(())
}

async fn serve(app: &App) -> Result<()> {
    let executor = app.executor()?;
    let registry = app.registry();
    let dispatcher = Dispatcher::new(
        Arc::clone(&registry),
        Arc::new(executor.clone()) as Arc<dyn FlowRunner>,
        &app.config.scheduler,
    );
    dispatcher.start();
    println!("🛫 FlowPilot serving {} schedules (Ctrl-C to stop)", registry.len());

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    println!("\n🛑 Shutting down...");
    dispatcher.stop().await;
    for flow_id in executor.running_flows() {
        executor.stop(&flow_id).await;
    }
    Ok(())
}

async fn run_flow(app: &App, flow_id: &str) -> Result<()> {
    let executor = app.executor()?;
    let Some(mut events) = executor.execute_streaming(flow_id) else {
        anyhow::bail!("flow {flow_id} cannot run (unknown, not ready, or already running)");
    };

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => match event.stream {
                    LogStream::Stderr => eprintln!("{}", event.line),
                    _ => println!("{}", event.line),
                },
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                executor.stop(flow_id).await;
                while let Some(event) = events.recv().await {
                    println!("{}", event.line);
                }
                break;
            }
        }
    }

    if let Some(flow) = app.flows.get_flow(flow_id) {
        println!("\n📊 Status: {}", flow.execution_status);
        if let Some(err) = flow.error_message {
            println!("{err}");
        }
    }
    Ok(())
}

fn flows(app: &App, cmd: FlowsCommand) -> Result<()> {
    match cmd {
        FlowsCommand::List => {
            let list = app.flows.list_flows();
            if list.is_empty() {
                println!("No flows registered.");
            }
            for flow in list {
                println!(
                    "{}  {:<24} {:<13} last: {:<11} {}",
                    flow.id,
                    flow.name,
                    flow.status.to_string(),
                    flow.execution_status.to_string(),
                    flow.project_path.display()
                );
            }
        }
        FlowsCommand::Add {
            name,
            project_path,
            ready,
        } => {
            let path = std::fs::canonicalize(&project_path)
                .with_context(|| format!("project path {}", project_path.display()))?;
            let flow = app.flows.add_flow(flowpilot_core::Flow::new(&name, path))?;
            if ready {
                app.flows.set_flow_status(&flow.id, FlowStatus::Ready)?;
            }
            println!("✅ Flow '{}' added: {}", flow.name, flow.id);
        }
        FlowsCommand::Ready { flow_id } => {
            app.flows.set_flow_status(&flow_id, FlowStatus::Ready)?;
            println!("✅ Flow {flow_id} is ready");
        }
        FlowsCommand::Delete { flow_id } => {
            if app.flows.delete_flow(&flow_id) {
                println!("🗑️ Flow {flow_id} deleted");
            } else {
                anyhow::bail!("flow {flow_id} not found");
            }
        }
    }
    Ok(())
}

fn schedules(app: &App, cmd: SchedulesCommand) -> Result<()> {
    let registry = app.registry();
    match cmd {
        SchedulesCommand::List => {
            let all = registry.get_all_schedules();
            if all.is_empty() {
                println!("No schedules.");
            }
            for s in all {
                print_schedule(&s);
            }
        }
        SchedulesCommand::Next { n } => {
            for run in registry.get_next_runs(n) {
                println!(
                    "{}  {:<24} {:<15} {}",
                    run.next_run.format("%Y-%m-%d %H:%M"),
                    run.flow_name,
                    run.schedule_type.to_string(),
                    run.description.unwrap_or_default()
                );
            }
        }
        SchedulesCommand::Add(add) => {
            let created = add_schedule(&registry, add)?;
            println!("📅 Schedule created: {}", created.id);
            print_schedule(&created);
        }
        SchedulesCommand::Update(args) => {
            let update = ScheduleUpdate {
                time: args.time,
                times: args.times,
                days: args.days,
                day_times: if args.day_times.is_empty() {
                    None
                } else {
                    Some(parse_assignments(&args.day_times)?)
                },
                start_date: args.start,
                end_date: args.end,
                interval_minutes: args.interval,
                interval_start_time: args.window_start,
                interval_end_time: args.window_end,
                description: args.description,
            };
            let updated = registry.update_schedule(&args.schedule_id, update)?;
            print_schedule(&updated);
        }
        SchedulesCommand::Delete { schedule_id } => {
            if !registry.delete_schedule(&schedule_id) {
                anyhow::bail!("schedule {schedule_id} not found");
            }
            println!("🗑️ Schedule {schedule_id} deleted");
        }
        SchedulesCommand::Toggle { schedule_id } => match registry.toggle_schedule(&schedule_id) {
            Some(true) => println!("▶️ Schedule {schedule_id} enabled"),
            Some(false) => println!("⏸️ Schedule {schedule_id} disabled"),
            None => anyhow::bail!("schedule {schedule_id} not found"),
        },
    }
    Ok(())
}

fn add_schedule(registry: &ScheduleRegistry, add: AddSchedule) -> Result<ScheduleConfig> {
    let created = match add {
        AddSchedule::Daily {
            flow_id,
            time,
            description,
        } => registry.create_daily_schedule(&flow_id, &time, description)?,
        AddSchedule::Weekly {
            flow_id,
            time,
            days,
            description,
        } => registry.create_weekly_schedule(&flow_id, &days, &time, description)?,
        AddSchedule::Dates {
            flow_id,
            time,
            dates,
            date_times,
            description,
        } => {
            let date_times = parse_assignments(&date_times)?;
            registry.create_specific_dates_schedule(&flow_id, &dates, &time, &date_times, description)?
        }
        AddSchedule::Custom {
            flow_id,
            time,
            days,
            start,
            end,
            description,
        } => registry.create_custom_schedule(
            &flow_id,
            &time,
            &days,
            start.as_deref(),
            end.as_deref(),
            description,
        )?,
        AddSchedule::Interval {
            flow_id,
            minutes,
            start,
            end,
            days,
            description,
        } => registry.create_interval_schedule(
            &flow_id,
            minutes,
            start.as_deref(),
            end.as_deref(),
            &days,
            description,
        )?,
        AddSchedule::Times {
            flow_id,
            times,
            days,
            description,
        } => registry.create_multiple_times_schedule(&flow_id, &times, &days, description)?,
        AddSchedule::DayTimes {
            flow_id,
            day_times,
            description,
        } => {
            let day_times = parse_assignments(&day_times)?;
            registry.create_day_specific_schedule(&flow_id, &day_times, description)?
        }
    };
    Ok(created)
}

/// Parse `key=a,b` pairs into a map; repeated keys accumulate.
fn parse_assignments(items: &[String]) -> Result<BTreeMap<String, Vec<String>>> {
    let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for item in items {
        let (key, values) = item
            .split_once('=')
            .with_context(|| format!("expected KEY=HH:MM[,HH:MM], got '{item}'"))?;
        map.entry(key.trim().to_string())
            .or_default()
            .extend(values.split(',').map(|v| v.trim().to_string()).filter(|v| !v.is_empty()));
    }
    Ok(map)
}

fn print_schedule(s: &ScheduleConfig) {
    let next = s
        .next_run
        .map(|n| n.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".into());
    println!(
        "{}  {} {:<24} {:<15} next: {:<16} runs: {:<4} {}",
        s.id,
        if s.active { "●" } else { "○" },
        s.flow_name,
        s.schedule_type().to_string(),
        next,
        s.run_count,
        s.description.as_deref().unwrap_or_default()
    );
}
