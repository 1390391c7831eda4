use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use mobile_qa_agent::agent_engine::event_bus::RunEvent;
use mobile_qa_agent::agent_engine::state::TestCase;
use mobile_qa_agent::config::{self, AppConfig};
use mobile_qa_agent::device::adb::AdbDevice;
use mobile_qa_agent::errors::{QaError, QaResult};
use mobile_qa_agent::gateway::RateLimiter;
use mobile_qa_agent::suite::{self, SuiteRunner};

#[derive(Parser)]
#[command(name = "mobile-qa")]
#[command(about = "Vision-model driven UI testing for Android apps", long_about = None)]
#[command(version)]
struct Cli {
    /// Log filter used when RUST_LOG is unset
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Path to config.toml (default: next to the executable, then the working directory)
    #[arg(short, long, global = true, env = "MOBILE_QA_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a test suite or a single goal against the connected device
    Run {
        /// JSON file with an array of test cases
        #[arg(long, conflicts_with = "goal", required_unless_present = "goal")]
        tests: Option<PathBuf>,

        /// Natural-language goal for a single ad-hoc test
        #[arg(long)]
        goal: Option<String>,

        /// Step budget for cases that do not set their own
        #[arg(long)]
        max_steps: Option<u32>,

        /// adb device serial
        #[arg(long, env = "ANDROID_SERIAL")]
        serial: Option<String>,
    },

    /// Write a default config.toml
    InitConfig {
        #[arg(default_value = "config.toml")]
        path: PathBuf,
    },

    /// Load the config and report problems
    CheckConfig,
}

fn load(path: Option<&PathBuf>) -> QaResult<AppConfig> {
    match path {
        Some(p) => config::load_config_from(p),
        None => config::load_config(),
    }
}

async fn run(
    cfg_path: Option<&PathBuf>,
    tests: Option<PathBuf>,
    goal: Option<String>,
    max_steps: Option<u32>,
    serial: Option<String>,
) -> QaResult<bool> {
    let mut cfg = load(cfg_path)?;
    if let Some(steps) = max_steps {
        cfg.agent.max_steps = steps;
    }
    if serial.is_some() {
        cfg.device.serial = serial;
    }
    let problems = cfg.validate();
    if !problems.is_empty() {
        return Err(QaError::Config(problems.join("; ")));
    }

    let cases = match (tests, goal) {
        (Some(path), _) => suite::load_test_cases(&path)?,
        (None, Some(goal)) => vec![TestCase::from_goal(goal)],
        (None, None) => return Err(QaError::Config("either --tests or --goal is required".into())),
    };

    let device = Arc::new(AdbDevice::new(&cfg.device));
    let orchestrator = mobile_qa_agent::build_orchestrator(&cfg, device.clone(), RateLimiter::shared())?;

    let mut events = orchestrator.events().subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            print_progress(&event);
        }
    });

    let cancel = orchestrator.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping after the current step");
            cancel.cancel();
        }
    });

    let runner = SuiteRunner::new(orchestrator, device, cfg.device.app_package.clone());
    let summary = runner.run_all(cases).await?;
    println!("{}", summary.render());
    Ok(summary.all_passed())
}

fn print_progress(event: &RunEvent) {
    match event {
        RunEvent::ActionPlanned { step, planned, .. } => {
            println!("  [{step:>2}] {:?}  ({})", planned.action, planned.reasoning);
        }
        RunEvent::ActionExecuted { step, result, .. } if !result.success => {
            println!("  [{step:>2}] failed ({:?}): {}", result.failure_class, result.raw_output);
        }
        RunEvent::VerdictReached { verdict, .. } => {
            println!("  => {:?}: {}", verdict.status, verdict.rationale);
        }
        _ => {}
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    mobile_qa_agent::init_tracing(&cli.log_level);

    let result = match cli.command {
        Commands::Run {
            tests,
            goal,
            max_steps,
            serial,
        } => run(cli.config.as_ref(), tests, goal, max_steps, serial).await,
        Commands::InitConfig { path } => {
            if path.exists() {
                Err(QaError::Config(format!("{} already exists", path.display())))
            } else {
                config::save_config(&AppConfig::default(), &path).map(|_| {
                    println!("wrote {}", path.display());
                    true
                })
            }
        }
        Commands::CheckConfig => load(cli.config.as_ref()).map(|cfg| {
            let problems = cfg.validate();
            for p in &problems {
                println!("problem: {p}");
            }
            if problems.is_empty() {
                println!("config OK (chain: {})", cfg.llm.chain.join(" -> "));
            }
            problems.is_empty()
        }),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(QaError::Cancelled) => {
            eprintln!("cancelled");
            ExitCode::from(130)
        }
        Err(e) => {
            tracing::error!(error = %e, "mobile-qa failed");
            eprintln!("error: {e}");
            ExitCode::from(2)
        }
    }
}
