//! `xload` command line entry point.
//!
//! ```text
//! xload <operation> [request.json]
//! ```
//!
//! Runs one job of the family named by `<operation>` (e.g. `packBins`) against
//! the endpoint configured through `XLOAD_*` variables. The request is read
//! from the file argument, or from stdin if none is given. Progress is logged;
//! the result is printed to stdout as JSON.

use std::io::Read;

use anyhow::{Context, bail};
use serde_json::Value;
use xload_client::{ClientConfig, JobFamily, JobUpdate, XLoadClient};
use xload_observability::LogFormat;

const ENV_LOG_FORMAT: &str = "XLOAD_LOG_FORMAT";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let format = std::env::var(ENV_LOG_FORMAT)
        .ok()
        .and_then(|name| LogFormat::parse(&name))
        .unwrap_or_default();
    xload_observability::init_with(format);

    let mut args = std::env::args().skip(1);
    let Some(operation) = args.next() else {
        bail!("usage: xload <operation> [request.json]");
    };
    let request = read_request(args.next()).context("failed to read request")?;

    let config = ClientConfig::from_env().context("invalid XLOAD_* configuration")?;
    let client = XLoadClient::new(config).context("failed to create client")?;

    let family = JobFamily::predefined(&operation).unwrap_or_else(|| JobFamily::new(&operation));
    tracing::info!("Running {} against {}", family.operation, client.endpoint());

    let result = client
        .job(family, request)
        .on_progress(|update| match update {
            JobUpdate::Status(job) => tracing::info!("Job {} is {}", job.id, job.status),
            JobUpdate::Retrying { error, attempt } => {
                tracing::warn!("Retry {attempt} after recoverable error: {error}")
            }
        })
        .run()
        .await
        .with_context(|| format!("{operation} job failed"))?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn read_request(path: Option<String>) -> anyhow::Result<Value> {
    let raw = match path {
        Some(path) => std::fs::read_to_string(&path).with_context(|| format!("cannot read {path}"))?,
        None => {
            let mut raw = String::new();
            std::io::stdin().read_to_string(&mut raw)?;
            raw
        }
    };

    serde_json::from_str(&raw).context("request is not valid JSON")
}
