use anyhow::{bail, Context, Result};
use autoflow::{
    AutomationConfig, ChromeDriver, ConfigQueue, ExecutionEngine, RetryController, RetryOutcome,
    RunnerConfig,
};
use clap::{Arg, ArgAction, Command};
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("autoflow")
        .about("Runs browser automation configs with retries and resumable downloads")
        .arg(
            Arg::new("configs")
                .help("Automation config files, run in order")
                .required(true)
                .num_args(1..)
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("runner-config")
                .long("runner-config")
                .help("Runner settings file (JSON)")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("state-dir")
                .long("state-dir")
                .help("Directory for persisted download state")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("check")
                .long("check")
                .help("Validate the configs and exit")
                .action(ArgAction::SetTrue),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();

    let mut settings = match matches.get_one::<PathBuf>("runner-config") {
        Some(path) => RunnerConfig::load(path)
            .await
            .with_context(|| format!("loading runner config {}", path.display()))?,
        None => RunnerConfig::default(),
    };
    if let Some(dir) = matches.get_one::<PathBuf>("state-dir") {
        settings = settings.with_state_dir(dir.clone());
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut configs = Vec::new();
    for path in matches.get_many::<PathBuf>("configs").into_iter().flatten() {
        let config = AutomationConfig::load(path)
            .await
            .with_context(|| format!("loading {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("validating {}", path.display()))?;
        configs.push(config);
    }
    info!(count = configs.len(), "configs loaded");

    if matches.get_flag("check") {
        return Ok(());
    }

    let engine = ExecutionEngine::new(ChromeDriver::new(), settings);
    let handle = engine.control_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current action");
            handle.stop();
        }
    });

    let queue = ConfigQueue::new(RetryController::new(&engine));
    let results = queue.run(&configs).await;

    let mut unsuccessful = 0;
    for entry in &results {
        match &entry.outcome {
            Ok(RetryOutcome::Success(report)) => info!(
                config = %entry.name,
                actions = report.actions_executed,
                downloads = report.downloads.iter().map(|d| d.downloaded.len()).sum::<usize>(),
                "succeeded"
            ),
            Ok(RetryOutcome::Exhausted { attempts, last }) => {
                unsuccessful += 1;
                let reason = last
                    .failure
                    .as_ref()
                    .map(|f| f.to_string())
                    .unwrap_or_default();
                error!(config = %entry.name, attempts, %reason, "retries exhausted");
            }
            Ok(RetryOutcome::Stopped(_)) => {
                unsuccessful += 1;
                warn!(config = %entry.name, "stopped");
            }
            Err(e) => {
                unsuccessful += 1;
                error!(config = %entry.name, error = %e, "rejected");
            }
        }
    }

    if unsuccessful > 0 {
        bail!("{} of {} configs did not succeed", unsuccessful, configs.len());
    }
    Ok(())
}
