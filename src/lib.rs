use std::path::Path;

use crate::api::config_dto::HarnessConfigDto;
use crate::domain::config::HarnessConfig;
use crate::error::Result;
use crate::loader::parser::parse_json_file;

pub mod api;
pub mod domain;
pub mod error;
pub mod loader;
pub mod logger;

/// Reads and validates a JSON harness configuration.
pub fn load_config(file_path: &Path) -> Result<HarnessConfig> {
    let dto: HarnessConfigDto = parse_json_file::<HarnessConfigDto>(file_path)?;
    log::info!("Configuration file '{}' parsed successfully.", file_path.display());

    let config = HarnessConfig::try_from(dto)?;
    log::debug!("Validated configuration: {:?}", config);

    Ok(config)
}
