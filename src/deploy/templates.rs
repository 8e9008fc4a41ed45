//! Files the deployment writes before handing off to the cloud CLIs.

use crate::deploy::DeployConfig;
use serde_json::{Value, json};

/// Bucket CORS policy: any origin, the four API verbs, one hour preflight cache.
pub fn cors_policy() -> Value {
    json!([{
        "origin": ["*"],
        "method": ["GET", "POST", "PUT", "DELETE"],
        "responseHeader": ["Content-Type", "Authorization", "Content-Length", "User-Agent"],
        "maxAgeSeconds": 3600
    }])
}

/// Source of the demo HTTP function: echoes the request body back with a
/// timestamp and answers CORS preflights.
pub fn function_source(function_name: &str) -> String {
    // A JSON string literal is also a valid JS string literal.
    let export = Value::String(function_name.to_string());
    format!(
        r#"exports[{export}] = (req, res) => {{
  const data = req.body || {{}};
  res.set('Access-Control-Allow-Origin', '*');
  res.set('Access-Control-Allow-Methods', 'GET, POST');
  res.set('Access-Control-Allow-Headers', 'Content-Type');

  if (req.method === 'OPTIONS') {{
    res.status(204).send('');
    return;
  }}

  res.status(200).send({{
    message: "Cloud Function executed successfully!",
    receivedData: data,
    timestamp: new Date().toISOString()
  }});
}};
"#
    )
}

pub fn function_package(function_name: &str) -> Value {
    json!({
        "name": function_name,
        "version": "1.0.0",
        "main": "index.js",
        "engines": { "node": "22" }
    })
}

/// `.env` for the deployed web server.
pub fn env_file(config: &DeployConfig) -> String {
    format!(
        "# GCP project configuration
GCP_PROJECT_ID={project}
GCP_STORAGE_BUCKET={bucket}
GCP_FUNCTION_NAME={function}
GCP_FUNCTION_REGION={region}

# Service account key file path. Cloud Run uses the service identity
# when this stays commented out.
# GOOGLE_APPLICATION_CREDENTIALS={key}

# Web server configuration
PORT=8080
",
        project = config.project_id,
        bucket = config.storage_bucket,
        function = config.function_name,
        region = config.function_region,
        key = config.service_account.display(),
    )
}

/// Two-stage image for the `gcp-console` server.
pub const DOCKERFILE: &str = r#"FROM rust:1-bookworm AS build
WORKDIR /app
COPY . .
RUN cargo build --release --bin gcp-console

FROM debian:bookworm-slim
RUN apt-get update \
    && apt-get install -y --no-install-recommends ca-certificates \
    && rm -rf /var/lib/apt/lists/*
WORKDIR /app
COPY --from=build /app/target/release/gcp-console /usr/local/bin/gcp-console
COPY --from=build /app/public ./public
COPY --from=build /app/.env ./.env

ENV PORT=8080
EXPOSE 8080

CMD ["gcp-console"]
"#;
