use std::time::Duration;

use serde::Serialize;
use tickguard_core::{FetchOptions, FetchOrchestrator, FetchResult, Query, QueryKind};

use super::CommandOutput;
use crate::cli::FetchArgs;
use crate::error::CliError;

#[derive(Debug, Serialize)]
struct FetchedResource<'a> {
    resource_id: &'a str,
    kind: QueryKind,
    #[serde(flatten)]
    result: &'a FetchResult,
}

#[derive(Debug, Serialize)]
struct FetchResponseData<'a> {
    results: Vec<FetchedResource<'a>>,
}

pub async fn run(
    args: &FetchArgs,
    orchestrator: &FetchOrchestrator,
    timeout_ms: Option<u64>,
) -> Result<CommandOutput, CliError> {
    let queries = args
        .resource_ids
        .iter()
        .map(|resource_id| build_query(resource_id, args.kind.into(), &args.params))
        .collect::<Result<Vec<_>, _>>()?;

    let mut results = Vec::with_capacity(queries.len());
    for query in &queries {
        let mut options = FetchOptions::default().with_cache_mode(args.cache_mode.into());
        if let Some(timeout_ms) = timeout_ms {
            options = options.with_timeout(Duration::from_millis(timeout_ms));
        }
        results.push(orchestrator.fetch_with(query, options).await);
    }

    let data = FetchResponseData {
        results: queries
            .iter()
            .zip(&results)
            .map(|(query, result)| FetchedResource {
                resource_id: query.resource_id(),
                kind: query.kind(),
                result,
            })
            .collect(),
    };

    Ok(CommandOutput::ok(serde_json::to_value(data)?).with_results(&results))
}

fn build_query(resource_id: &str, kind: QueryKind, params: &[String]) -> Result<Query, CliError> {
    params.iter().try_fold(Query::new(resource_id, kind)?, |query, raw| {
        let (name, value) = raw.split_once('=').ok_or_else(|| {
            CliError::Command(format!("parameter '{raw}' must look like name=value"))
        })?;
        Ok(query.with_param(name.trim(), value.trim())?)
    })
}
