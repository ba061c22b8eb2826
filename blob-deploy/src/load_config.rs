/// `load_config` module: Loads a static YAML deploy config and injects storage secrets from the environment.
///
/// This is the only place where user-supplied YAML is parsed into the strongly-typed
/// [`DeployOptions`] of `blob-deploy-core` and the [`StorageConfig`] of the Azure transport.
///
/// # Responsibilities
/// - Parse the `source`, `deploy` and `storage` sections
/// - Fill `storage.account` and the SAS token from `AZURE_STORAGE_ACCOUNT` / `AZURE_STORAGE_SAS_TOKEN`
/// - Fail with clear diagnostics: a missing file or malformed YAML is reported with its path
///
/// # Errors
/// All errors use `anyhow::Error` and are surfaced at the CLI boundary.
use crate::azure::StorageConfig;
use anyhow::Result;
use blob_deploy_core::config::DeployOptions;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

#[derive(Debug, Clone, Deserialize)]
pub struct CliConfig {
    pub source: SourceSection,
    pub deploy: DeployOptions,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceSection {
    /// Directory whose files are deployed; keys are relative to it.
    pub dir: PathBuf,
}

/// Loads a static YAML config file (no secrets) and injects the storage secrets from env.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => {
            info!(config_path = ?path_ref, "Config file read successfully");
            content
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    let raw: CliConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    let storage = raw.storage.with_env();
    info!(
        account = ?storage.account,
        endpoint = ?storage.endpoint,
        sas = storage.sas_token.is_some(),
        "Storage settings resolved"
    );
    raw.deploy.trace_loaded();

    Ok(CliConfig {
        source: raw.source,
        deploy: raw.deploy,
        storage,
    })
}
