///
/// This module implements the CLI interface for blob-deploy: command parsing,
/// argument handling and the async entrypoint used by `main` and integration tests.
///
/// All deploy semantics (preparation, key derivation, compression, concurrency)
/// live in the [`blob-deploy-core`] crate. This module only wires the YAML config,
/// the collected files and the Azure transport together.
///
/// ## How To Use
/// - From the shell: `blob-deploy deploy --config deploy.yaml [--test-run]`.
/// - Programmatically: call [`run`] with a constructed [`Cli`].
///
/// [`blob-deploy-core`]: ../../blob-deploy-core/
/// [`Cli`]: struct.Cli.html
/// [`run`]: fn.run.html
use crate::azure::AzureBlobClient;
use crate::collect::collect_files;
use crate::load_config::load_config;
use anyhow::Result;
use blob_deploy_core::deploy::deploy;
use blob_deploy_core::events::TracingSink;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// CLI for blob-deploy: publish a directory of static files into an Azure blob container.
#[derive(Parser)]
#[clap(
    name = "blob-deploy",
    version,
    about = "Deploy static files to Azure Blob Storage with optional gzip and prefix cleanup"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Upload every file of the configured source directory to the container
    Deploy {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Log what would be deleted and uploaded without touching existing blobs
        #[clap(long)]
        test_run: bool,
    },
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Deploy { config, test_run } => {
            let mut config = load_config(config)?;
            if test_run {
                config.deploy.test_run = true;
            }
            let files = collect_files(&config.source.dir)?;
            let transport = AzureBlobClient::new(&config.storage)
                .map_err(|e| anyhow::anyhow!("Failed to construct blob client: {e}"))?;

            tracing::info!(
                command = "deploy",
                container = %config.deploy.container_name,
                files = files.len(),
                test_run = config.deploy.test_run,
                "Starting deploy"
            );
            match deploy(&transport, &config.deploy, &files, &TracingSink).await {
                Ok(()) => {
                    tracing::info!(command = "deploy", files = files.len(), "Deploy complete");
                    Ok(())
                }
                Err(e) => {
                    tracing::error!(command = "deploy", error = %e, "Deploy failed");
                    Err(anyhow::Error::new(e))
                }
            }
        }
    }
}
