use std::time::Duration;

use serde::Serialize;
use tickguard_core::health::ErrorRecord;
use tickguard_core::{EndpointStatus, FetchOptions, FetchOrchestrator, HealthSummary, Query};

use super::CommandOutput;
use crate::cli::HealthArgs;
use crate::error::CliError;

const RECENT_ERROR_WINDOW: Duration = Duration::from_secs(3_600);

#[derive(Debug, Serialize)]
struct HealthResponseData {
    summary: HealthSummary,
    endpoints: Vec<EndpointStatus>,
    recent_errors: Vec<ErrorRecord>,
}

pub async fn run(
    args: &HealthArgs,
    orchestrator: &FetchOrchestrator,
    timeout_ms: Option<u64>,
) -> Result<CommandOutput, CliError> {
    let mut results = Vec::with_capacity(args.probes.len());
    for resource_id in &args.probes {
        let query = Query::new(resource_id, args.kind.into())?;
        let mut options = FetchOptions::default();
        if let Some(timeout_ms) = timeout_ms {
            options = options.with_timeout(Duration::from_millis(timeout_ms));
        }
        results.push(orchestrator.fetch_with(&query, options).await);
    }

    let monitor = orchestrator.health_monitor();
    if let Some(path) = &args.report {
        monitor.export_report(path)?;
    }

    let data = HealthResponseData {
        summary: monitor.summary(),
        endpoints: orchestrator.endpoint_statuses(),
        recent_errors: monitor.recent_errors(RECENT_ERROR_WINDOW),
    };

    Ok(CommandOutput::ok(serde_json::to_value(data)?).with_results(&results))
}
