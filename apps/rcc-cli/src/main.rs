use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;

use rcc_app::{AppResult, ControlCore, CoreConfig, Registries, Scenario};
use rcc_net::NetStatus;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rcc-cli")]
#[command(about = "Robot control core CLI - load, evaluate and run fragment descriptions", long_about = None)]
struct Cli {
    /// Core configuration YAML file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a scenario file and build its fragment
    Validate {
        /// Path to the scenario YAML file
        scenario_path: PathBuf,
    },
    /// Run one inline cycle and print the outputs as JSON
    Eval {
        /// Path to the scenario YAML file
        scenario_path: PathBuf,
    },
    /// Start the net and wait for it to terminate
    Run {
        /// Path to the scenario YAML file
        scenario_path: PathBuf,
        /// Kill the net after this many cycles
        #[arg(long)]
        cycles: Option<u64>,
        /// Run without realtime lag monitoring
        #[arg(long)]
        no_realtime: bool,
    },
}

fn main() -> AppResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("RCC_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => CoreConfig::load_yaml(path)?,
        None => CoreConfig::default(),
    };

    match cli.command {
        Commands::Validate { scenario_path } => cmd_validate(&scenario_path, config),
        Commands::Eval { scenario_path } => cmd_eval(&scenario_path, config),
        Commands::Run {
            scenario_path,
            cycles,
            no_realtime,
        } => cmd_run(&scenario_path, config, cycles, !no_realtime),
    }
}

fn cmd_validate(scenario_path: &Path, config: CoreConfig) -> AppResult<()> {
    println!("Validating scenario: {}", scenario_path.display());
    let scenario = Scenario::load_yaml(scenario_path)?;
    let core = ControlCore::manual(config, Registries::standard())?;
    let net = core.load_scenario(&scenario, true)?;
    println!(
        "✓ Scenario is valid: {} primitives, {} devices, actuators {:?}",
        scenario.fragment.primitives.len(),
        scenario.devices.len(),
        net.actuators()
    );
    core.unload(&net)?;
    Ok(())
}

fn cmd_eval(scenario_path: &Path, config: CoreConfig) -> AppResult<()> {
    let scenario = Scenario::load_yaml(scenario_path)?;
    let core = ControlCore::manual(config, Registries::standard())?;
    for device in &scenario.devices {
        core.add_device(&device.name, &device.device_type, &device.text_parameters())?;
    }
    let outputs = core.eval_description(&scenario.fragment)?;
    println!("{}", serde_json::to_string_pretty(&outputs)?);
    Ok(())
}

fn cmd_run(
    scenario_path: &Path,
    config: CoreConfig,
    cycles: Option<u64>,
    realtime: bool,
) -> AppResult<()> {
    let scenario = Scenario::load_yaml(scenario_path)?;
    let core = ControlCore::new(config, Registries::standard())?;
    let net = core.load_scenario(&scenario, realtime)?;
    tracing::info!(net = %net.name(), "starting");
    core.try_start(std::slice::from_ref(&net))?;

    let poll = net.cycle_time().max(Duration::from_millis(1));
    loop {
        if net.wait_terminated(Some(poll)) == NetStatus::Terminated {
            break;
        }
        if cycles.is_some_and(|limit| net.cycles() >= limit) {
            net.kill();
        }
    }
    core.shutdown();

    let outcome = if net.is_completed() {
        "completed".to_string()
    } else if net.is_killed() {
        "killed".to_string()
    } else {
        format!("failed: {}", net.failure().unwrap_or_default())
    };
    let report = serde_json::json!({
        "net": net.name(),
        "outcome": outcome,
        "cycles": net.cycles(),
        "netcomm": net.netcomm_snapshot(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
