//! CLI entry point for the observation engine.
//!
//! Drives a full observation run against mock hardware, which is useful for
//! rehearsing scenarios and testing job scripts without a telescope:
//!
//! ```bash
//! polar-obs run --config config/config.toml --target "HD 204827" \
//!     --cycle linear --repeats 4 --yes
//! ```
//!
//! `check` parses a job script and prints its action tree; `scenario` lists
//! the resolved Light/Bias/Dark script paths per cycle type.

// Global allocator (Microsoft Rust Guidelines: M-MIMALLOC-APPS)
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use polar_obs::actions::{ActionKind, JobAction};
use polar_obs::config::Settings;
use polar_obs::hardware::camera::Camera;
use polar_obs::hardware::mock::{MockCamera, MockStepMotor};
use polar_obs::hardware::motor::StepMotor;
use polar_obs::hardware::notifier::{AutoNotifier, ConsoleNotifier, Notifier};
use polar_obs::hardware::AcquisitionSettings;
use polar_obs::job::Job;
use polar_obs::logging;
use polar_obs::manager::{JobManager, RunOutcome};
use polar_obs::target::{CycleType, Target};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "polar-obs")]
#[command(about = "Observation-run automation for a multi-camera polarimeter", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a full observation against mock hardware
    Run {
        /// Configuration file; written with starter defaults when missing
        #[arg(long, default_value = "config/config.toml")]
        config: PathBuf,
        /// Target star name
        #[arg(long)]
        target: String,
        /// Observation cycle: photometric, linear or circular
        #[arg(long, default_value = "linear")]
        cycle: String,
        /// How many times to repeat the acquisition job
        #[arg(long, default_value_t = 1)]
        repeats: u32,
        /// Answer calibration prompts with yes instead of asking
        #[arg(long)]
        yes: bool,
    },
    /// Parse a job script and print its action tree
    Check {
        /// Path to the job script
        script: PathBuf,
    },
    /// List the configured observation scenarios
    Scenario {
        /// Configuration file
        #[arg(long, default_value = "config/config.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            config,
            target,
            cycle,
            repeats,
            yes,
        } => run(config, target, cycle, repeats, yes).await,
        Commands::Check { script } => check(script),
        Commands::Scenario { config } => scenario(config),
    }
}

async fn run(
    config: PathBuf,
    target_name: String,
    cycle: String,
    repeats: u32,
    yes: bool,
) -> Result<()> {
    let wrote_starter = !config.exists();
    if wrote_starter {
        Settings::write_starter(&config)
            .with_context(|| format!("writing starter configuration to {}", config.display()))?;
    }
    let settings = Settings::load_from(&config)
        .with_context(|| format!("loading configuration from {}", config.display()))?;
    settings.validate()?;
    logging::init_from_settings(&settings)?;
    info!(application = %settings.application.name, "starting");
    if wrote_starter {
        info!(path = %config.display(), "no configuration file found, wrote starter defaults");
    }

    let cycle: CycleType = cycle.parse()?;

    // Mock hardware: the configured number of cameras plus one wave-plate
    // motor.
    let mut cameras: Vec<Arc<dyn Camera>> = Vec::new();
    for index in 1..=settings.camera.mock_cameras {
        cameras.push(Arc::new(MockCamera::new(format!("cam-{index}"))));
    }
    let motor: Option<Arc<dyn StepMotor>> = Some(Arc::new(MockStepMotor::new()));
    let notifier: Arc<dyn Notifier> = if yes {
        Arc::new(AutoNotifier::new(true))
    } else {
        Arc::new(ConsoleNotifier::new())
    };

    let shared = AcquisitionSettings {
        exposure: settings.camera.default_exposure,
        gain: settings.camera.default_gain,
    };
    let manager = Arc::new(JobManager::new(settings, cameras, motor, notifier));

    manager
        .submit_new_target(Target::new(target_name, cycle, shared))
        .await?;
    manager.start_job(repeats).await?;

    // Ctrl-C cancels the run cooperatively; the run task then reports
    // Cancelled below.
    {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling run");
                manager.stop_job().await;
            }
        });
    }

    let outcome = manager.wait_for_outcome().await?;
    println!("{}", manager.state());
    match outcome {
        RunOutcome::Completed => {
            info!("run completed");
            Ok(())
        }
        RunOutcome::Cancelled => {
            warn!("run cancelled");
            Ok(())
        }
        RunOutcome::Failed(error) => anyhow::bail!("run failed: {error}"),
    }
}

fn check(script: PathBuf) -> Result<()> {
    let job = Job::from_file(&script)
        .with_context(|| format!("parsing {}", script.display()))?;
    println!(
        "job '{}': {} top-level actions, {} camera frames per pass",
        job.name(),
        job.actions().len(),
        job.count_actions(ActionKind::Camera)
    );
    for action in job.actions() {
        print_action(action, 1);
    }
    Ok(())
}

fn print_action(action: &JobAction, depth: usize) {
    println!("{}- {}", "  ".repeat(depth), action);
    if let JobAction::Repeat(repeat) = action {
        for child in &repeat.actions {
            print_action(child, depth + 1);
        }
    }
}

fn scenario(config: PathBuf) -> Result<()> {
    let settings = Settings::load_from(&config)
        .with_context(|| format!("loading configuration from {}", config.display()))?;
    settings.validate()?;
    for cycle in CycleType::ALL {
        match settings.scenario_for(cycle) {
            Ok(scenario) => {
                println!("{cycle}:");
                println!("  light: {}", scenario.light.display());
                println!("  bias:  {}", scenario.bias.display());
                println!("  dark:  {}", scenario.dark.display());
            }
            Err(_) => println!("{cycle}: not configured"),
        }
    }
    Ok(())
}
