mod config;
mod fetch;
mod health;

use serde_json::Value;
use tickguard_core::{FetchConfig, FetchOrchestrator, FetchOrchestratorBuilder, FetchResult, FetchStatus};

use crate::cli::{Cli, Command};
use crate::error::CliError;

/// Rendered command payload plus the counts the exit code depends on.
pub struct CommandOutput {
    pub data: Value,
    pub total: usize,
    pub degraded: usize,
    pub empty: usize,
}

impl CommandOutput {
    pub fn ok(data: Value) -> Self {
        Self {
            data,
            total: 0,
            degraded: 0,
            empty: 0,
        }
    }

    pub fn with_results(mut self, results: &[FetchResult]) -> Self {
        self.total = results.len();
        self.degraded = results.iter().filter(|r| r.is_degraded()).count();
        self.empty = results
            .iter()
            .filter(|r| r.status == FetchStatus::Empty)
            .count();
        self
    }
}

pub async fn run(cli: &Cli) -> Result<CommandOutput, CliError> {
    let config = load_config(cli)?;

    match &cli.command {
        Command::Config => config::run(&config),
        Command::Fetch(args) => {
            let orchestrator = build_orchestrator(config)?;
            fetch::run(args, &orchestrator, cli.timeout_ms).await
        }
        Command::Health(args) => {
            let orchestrator = build_orchestrator(config)?;
            health::run(args, &orchestrator, cli.timeout_ms).await
        }
    }
}

fn load_config(cli: &Cli) -> Result<FetchConfig, CliError> {
    let config = match &cli.config {
        Some(path) => FetchConfig::from_json_file(path)?,
        None => FetchConfig::default(),
    };
    let config = config.with_env_overrides()?;
    config.validate()?;
    Ok(config)
}

fn build_orchestrator(config: FetchConfig) -> Result<FetchOrchestrator, CliError> {
    FetchOrchestratorBuilder::new()
        .with_config(config)
        .with_real_clients()
        .build()
        .map_err(CliError::from)
}
