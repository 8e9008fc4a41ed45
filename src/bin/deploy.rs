//! Provision the bucket, the demo function and the Cloud Run service.

use clap::Parser;
use gcp_console::deploy::{DeployConfig, Deployer, ShellRunner};
use std::process::ExitCode;

/// Deploy the console to Google Cloud using the `gcloud` and `gsutil` CLIs.
///
/// Settings come from the environment (and `.env`): GCP_PROJECT_ID,
/// GCP_STORAGE_BUCKET, GCP_FUNCTION_NAME, GCP_FUNCTION_REGION,
/// GCP_SERVICE_ACCOUNT, CLOUD_RUN_SERVICE, CLOUD_RUN_REGION.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {}

fn main() -> ExitCode {
    let _args = Args::parse();
    gcp_console::init_env_and_tracing();

    let config = DeployConfig::from_env();
    tracing::info!("Deploying with config: {:?}", config);

    let work_dir = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(err) => {
            tracing::error!("Deployment failed: cannot resolve working directory: {}", err);
            return ExitCode::FAILURE;
        }
    };

    match Deployer::new(config, ShellRunner, work_dir).run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("Deployment failed: {:#}", err);
            ExitCode::FAILURE
        }
    }
}
