use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, path::PathBuf};

const DEFAULT_PROJECT_ID: &str = "cloudrbl";
const DEFAULT_BUCKET: &str = "cloudrbl-storage";
const DEFAULT_FUNCTION_NAME: &str = "rblpractice";
const DEFAULT_FUNCTION_REGION: &str = "asia-south1";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 1024 * 1024 * 1024;

/// Centralized application configuration.
/// Combines environment variables (optionally loaded from `.env`) and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub static_dir: PathBuf,
    pub uploads_dir: PathBuf,
    pub downloads_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub gcp: GcpConfig,
    pub backend: StorageBackend,
}

/// Cloud project settings shared by the storage adapter and the function invoker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcpConfig {
    pub project_id: String,
    pub storage_bucket: String,
    pub function_name: String,
    pub function_region: String,
    /// Path to a service-account key file. `None` means metadata-server credentials.
    pub credentials: Option<PathBuf>,
    /// Explicit function URL; overrides the one derived from region/project/name.
    pub function_url: Option<String>,
    /// Storage API emulator (`STORAGE_EMULATOR_HOST`). Requests carry no credentials.
    pub storage_emulator: Option<String>,
}

impl GcpConfig {
    pub fn function_url(&self) -> String {
        match &self.function_url {
            Some(url) => url.clone(),
            None => format!(
                "https://{}-{}.cloudfunctions.net/{}",
                self.function_region, self.project_id, self.function_name
            ),
        }
    }
}

/// Which object store backs the storage routes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    Gcs,
    Local { root: PathBuf },
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Web console over a cloud storage bucket and a cloud function")]
pub struct Args {
    /// Host to bind to (overrides HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory holding index.html and the client assets (overrides STATIC_DIR)
    #[arg(long)]
    pub static_dir: Option<PathBuf>,

    /// Storage backend: `gcs` or `local` (overrides STORAGE_BACKEND)
    #[arg(long)]
    pub backend: Option<String>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    /// `.env` is expected to be loaded already.
    pub fn from_env_and_args() -> Result<Self> {
        let args = Args::parse();
        Self::from_lookup(args, |key| env::var(key).ok())
    }

    /// Build the config from parsed args and an environment lookup.
    pub fn from_lookup<F>(args: Args, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let env_port = match lookup("PORT") {
            Some(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing PORT value `{}`", value))?,
            None => 8080,
        };
        let max_upload_bytes = match lookup("MAX_UPLOAD_BYTES") {
            Some(value) => value
                .parse::<usize>()
                .with_context(|| format!("parsing MAX_UPLOAD_BYTES value `{}`", value))?,
            None => DEFAULT_MAX_UPLOAD_BYTES,
        };

        let backend_name = args
            .backend
            .clone()
            .unwrap_or_else(|| var("STORAGE_BACKEND", "gcs"));
        let backend = match backend_name.to_ascii_lowercase().as_str() {
            "gcs" => StorageBackend::Gcs,
            "local" => StorageBackend::Local {
                root: var("LOCAL_STORAGE_DIR", "./data/objects").into(),
            },
            other => bail!("unknown STORAGE_BACKEND `{}` (expected `gcs` or `local`)", other),
        };

        let gcp = GcpConfig {
            project_id: var("GCP_PROJECT_ID", DEFAULT_PROJECT_ID),
            storage_bucket: var("GCP_STORAGE_BUCKET", DEFAULT_BUCKET),
            function_name: var("GCP_FUNCTION_NAME", DEFAULT_FUNCTION_NAME),
            function_region: var("GCP_FUNCTION_REGION", DEFAULT_FUNCTION_REGION),
            credentials: lookup("GOOGLE_APPLICATION_CREDENTIALS")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            function_url: lookup("GCP_FUNCTION_URL").filter(|v| !v.is_empty()),
            storage_emulator: lookup("STORAGE_EMULATOR_HOST").filter(|v| !v.is_empty()),
        };

        // --- Merge ---
        Ok(Self {
            host: args.host.unwrap_or_else(|| var("HOST", "0.0.0.0")),
            port: args.port.unwrap_or(env_port),
            static_dir: args
                .static_dir
                .unwrap_or_else(|| var("STATIC_DIR", "./public").into()),
            uploads_dir: var("UPLOADS_DIR", "./uploads").into(),
            downloads_dir: var("DOWNLOADS_DIR", "./downloads").into(),
            max_upload_bytes,
            gcp,
            backend,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_environment_is_empty() {
        let cfg = AppConfig::from_lookup(Args::default(), lookup_from(&[])).unwrap();
        assert_eq!(cfg.addr(), "0.0.0.0:8080");
        assert_eq!(cfg.gcp.project_id, "cloudrbl");
        assert_eq!(cfg.gcp.storage_bucket, "cloudrbl-storage");
        assert_eq!(cfg.gcp.credentials, None);
        assert_eq!(cfg.backend, StorageBackend::Gcs);
        assert_eq!(cfg.uploads_dir, PathBuf::from("./uploads"));
        assert_eq!(
            cfg.gcp.function_url(),
            "https://asia-south1-cloudrbl.cloudfunctions.net/rblpractice"
        );
    }

    #[test]
    fn args_override_environment() {
        let args = Args {
            port: Some(9000),
            backend: Some("local".into()),
            ..Args::default()
        };
        let env = lookup_from(&[
            ("PORT", "7000"),
            ("STORAGE_BACKEND", "gcs"),
            ("LOCAL_STORAGE_DIR", "/tmp/objs"),
            ("GCP_FUNCTION_URL", "http://localhost:9999/fn"),
        ]);
        let cfg = AppConfig::from_lookup(args, env).unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(
            cfg.backend,
            StorageBackend::Local {
                root: PathBuf::from("/tmp/objs")
            }
        );
        assert_eq!(cfg.gcp.function_url(), "http://localhost:9999/fn");
    }

    #[test]
    fn invalid_port_is_reported() {
        let err = AppConfig::from_lookup(Args::default(), lookup_from(&[("PORT", "http")]))
            .unwrap_err();
        assert!(err.to_string().contains("PORT"));
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let env = lookup_from(&[("STORAGE_BACKEND", "s3")]);
        assert!(AppConfig::from_lookup(Args::default(), env).is_err());
    }
}
