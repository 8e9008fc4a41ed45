//! One-shot provisioning of the bucket, the demo function and the Cloud Run
//! service through the `gcloud` and `gsutil` CLIs.
//!
//! Steps run strictly in order with no rollback. A CLI command that fails is
//! logged and the run moves on; a local file-system failure aborts it.

pub mod runner;
pub mod templates;

use anyhow::{Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{error, info, warn};

pub use runner::{CommandOutcome, CommandRunner, CommandSpec, ShellRunner};

const CORS_FILE: &str = "cors.json";

/// Settings for a deployment run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployConfig {
    pub project_id: String,
    pub storage_bucket: String,
    pub function_name: String,
    pub function_region: String,
    pub service_account: PathBuf,
    pub cloud_run_name: String,
    pub cloud_run_region: String,
}

impl DeployConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str, default: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        Self {
            project_id: var("GCP_PROJECT_ID", "cloudrbl"),
            storage_bucket: var("GCP_STORAGE_BUCKET", "cloudrbl-storage"),
            function_name: var("GCP_FUNCTION_NAME", "rblpractice"),
            function_region: var("GCP_FUNCTION_REGION", "asia-south1"),
            service_account: PathBuf::from(var(
                "GCP_SERVICE_ACCOUNT",
                "./service-account-key.json",
            )),
            cloud_run_name: var("CLOUD_RUN_SERVICE", "rblpractice"),
            cloud_run_region: var("CLOUD_RUN_REGION", "asia-south1"),
        }
    }

    fn image(&self) -> String {
        format!("gcr.io/{}/cloudwebsite", self.project_id)
    }

    fn bucket_url(&self) -> String {
        format!("gs://{}", self.storage_bucket)
    }
}

/// What `gsutil ls -b` told us about the bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketStatus {
    Exists,
    Missing,
    /// Failed for another reason (auth, network, missing CLI).
    Unknown,
}

impl BucketStatus {
    pub fn classify(outcome: &CommandOutcome) -> Self {
        if outcome.success {
            return BucketStatus::Exists;
        }
        let stderr = outcome.stderr.to_ascii_lowercase();
        if stderr.contains("bucketnotfound") || stderr.contains("404") || stderr.contains("not found")
        {
            BucketStatus::Missing
        } else {
            BucketStatus::Unknown
        }
    }
}

pub struct Deployer<R: CommandRunner> {
    config: DeployConfig,
    runner: R,
    /// Where `.env`, `Dockerfile`, `cors.json` and the function scratch dir go.
    work_dir: PathBuf,
}

impl<R: CommandRunner> Deployer<R> {
    pub fn new(config: DeployConfig, runner: R, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            runner,
            work_dir: work_dir.into(),
        }
    }

    pub fn config(&self) -> &DeployConfig {
        &self.config
    }

    pub fn run(&self) -> Result<()> {
        info!("=== Starting automated deployment ===");
        self.set_project();
        self.create_storage_bucket()?;
        self.create_cloud_function()?;
        self.deploy_to_cloud_run()?;
        info!("=== Deployment completed ===");
        Ok(())
    }

    /// Run a command, logging failures. Returns the outcome when it ran.
    fn exec(&self, spec: CommandSpec) -> Option<CommandOutcome> {
        info!(command = %spec, "Running");
        match self.runner.run(&spec) {
            Ok(outcome) if outcome.success => Some(outcome),
            Ok(outcome) => {
                error!(command = %spec, code = ?outcome.code, "Command failed");
                Some(outcome)
            }
            Err(e) => {
                error!(command = %spec, error = %e, "Could not start command");
                None
            }
        }
    }

    pub fn set_project(&self) {
        info!(project = %self.config.project_id, "=== Setting GCP project ===");
        self.exec(CommandSpec::new(
            "gcloud",
            ["config", "set", "project", self.config.project_id.as_str()],
        ));
    }

    pub fn check_bucket(&self) -> BucketStatus {
        let spec =
            CommandSpec::new("gsutil", ["ls", "-b", self.config.bucket_url().as_str()]).capture_stderr();
        match self.exec(spec) {
            Some(outcome) => {
                if !outcome.stderr.is_empty() {
                    eprint!("{}", outcome.stderr);
                }
                BucketStatus::classify(&outcome)
            }
            None => BucketStatus::Unknown,
        }
    }

    pub fn create_storage_bucket(&self) -> Result<()> {
        let bucket = self.config.bucket_url();
        info!(bucket = %bucket, "=== Creating storage bucket ===");

        match self.check_bucket() {
            BucketStatus::Exists => info!(bucket = %bucket, "Bucket already exists"),
            BucketStatus::Missing => {
                info!(bucket = %bucket, "Bucket not found, creating it");
                self.exec(CommandSpec::new(
                    "gsutil",
                    ["mb", "-l", self.config.function_region.as_str(), bucket.as_str()],
                ));
            }
            BucketStatus::Unknown => {
                warn!(bucket = %bucket, "Could not determine whether the bucket exists; not creating it")
            }
        }

        let cors_path = self.work_dir.join(CORS_FILE);
        let policy = serde_json::to_vec_pretty(&templates::cors_policy())?;
        fs::write(&cors_path, policy)
            .with_context(|| format!("failed to write {}", cors_path.display()))?;
        self.exec(
            CommandSpec::new("gsutil", ["cors", "set", CORS_FILE, bucket.as_str()])
                .current_dir(&self.work_dir),
        );
        fs::remove_file(&cors_path)
            .with_context(|| format!("failed to remove {}", cors_path.display()))?;
        Ok(())
    }

    pub fn create_cloud_function(&self) -> Result<()> {
        let name = &self.config.function_name;
        info!(function = %name, "=== Creating Cloud Function ===");

        let function_dir = tempfile::Builder::new()
            .prefix("function-")
            .tempdir_in(&self.work_dir)
            .context("failed to create function source directory")?;
        write_file(
            function_dir.path(),
            "index.js",
            templates::function_source(name).as_bytes(),
        )?;
        write_file(
            function_dir.path(),
            "package.json",
            &serde_json::to_vec_pretty(&templates::function_package(name))?,
        )?;

        self.exec(
            CommandSpec::new(
                "gcloud",
                [
                    "functions",
                    "deploy",
                    name.as_str(),
                    "--runtime",
                    "nodejs22",
                    "--trigger-http",
                    "--allow-unauthenticated",
                    "--region",
                    self.config.function_region.as_str(),
                    "--project",
                    self.config.project_id.as_str(),
                ],
            )
            .current_dir(function_dir.path()),
        );

        function_dir
            .close()
            .context("failed to remove function source directory")?;
        Ok(())
    }

    pub fn deploy_to_cloud_run(&self) -> Result<()> {
        info!(service = %self.config.cloud_run_name, "=== Deploying website to Cloud Run ===");

        write_file(
            &self.work_dir,
            ".env",
            templates::env_file(&self.config).as_bytes(),
        )?;
        let dockerfile = self.work_dir.join("Dockerfile");
        if dockerfile.exists() {
            info!("Keeping existing Dockerfile");
        } else {
            write_file(&self.work_dir, "Dockerfile", templates::DOCKERFILE.as_bytes())?;
        }

        let image = self.config.image();
        self.exec(
            CommandSpec::new("gcloud", ["builds", "submit", "--tag", image.as_str()])
                .current_dir(&self.work_dir),
        );
        self.exec(CommandSpec::new(
            "gcloud",
            [
                "run",
                "deploy",
                self.config.cloud_run_name.as_str(),
                "--image",
                image.as_str(),
                "--platform",
                "managed",
                "--region",
                self.config.cloud_run_region.as_str(),
                "--allow-unauthenticated",
            ],
        ));
        Ok(())
    }
}

fn write_file(dir: &Path, name: &str, contents: &[u8]) -> Result<()> {
    let path = dir.join(name);
    fs::write(&path, contents).with_context(|| format!("failed to write {}", path.display()))
}
