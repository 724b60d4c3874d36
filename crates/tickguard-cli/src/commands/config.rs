use tickguard_core::FetchConfig;

use super::CommandOutput;
use crate::error::CliError;

pub fn run(config: &FetchConfig) -> Result<CommandOutput, CliError> {
    Ok(CommandOutput::ok(serde_json::to_value(config)?))
}
