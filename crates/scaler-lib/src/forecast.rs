//! Forecast oracle client
//!
//! HTTP interface to the external prediction service: a one-time
//! fit/prime upload of historical data during warm-up, and a predict
//! query per reconciliation cycle. The oracle's model is opaque; only
//! timestamps and resource quantities cross this boundary.

use crate::error::ScalerError;
use crate::models::{ForecastRequest, ForecastResult};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Wire format for predict-request timestamps (second precision, UTC)
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// External prediction oracle
#[async_trait]
pub trait ForecastOracle: Send + Sync {
    /// Prime the oracle's model with a historical dataset. Used once,
    /// during warm-up.
    async fn fit(&self, dataset: &Path) -> Result<(), ScalerError>;

    /// Predicted resource demand at the requested instant.
    async fn predict(&self, request: &ForecastRequest) -> Result<ForecastResult, ScalerError>;
}

/// HTTP client for the forecast oracle
pub struct HttpForecastClient {
    client: Client,
    base_url: Url,
}

impl HttpForecastClient {
    /// Create a client against the oracle endpoint
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid forecast endpoint URL")?;

        Ok(Self { client, base_url })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ScalerError> {
        self.base_url
            .join(path)
            .map_err(|e| ScalerError::transient("forecast", e))
    }
}

#[async_trait]
impl ForecastOracle for HttpForecastClient {
    async fn fit(&self, dataset: &Path) -> Result<(), ScalerError> {
        let bytes = tokio::fs::read(dataset)
            .await
            .map_err(|e| ScalerError::WarmUpNotReady(format!("cannot read dataset: {e}")))?;
        let file_name = dataset
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "dataset.csv".to_string());

        let form = Form::new().part("file", Part::bytes(bytes).file_name(file_name));
        let url = self
            .endpoint("fit-model")
            .map_err(|e| ScalerError::WarmUpNotReady(e.to_string()))?;

        let response = self
            .client
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ScalerError::WarmUpNotReady(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ScalerError::WarmUpNotReady(format!(
                "fit-model returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn predict(&self, request: &ForecastRequest) -> Result<ForecastResult, ScalerError> {
        let url = self.endpoint("predict")?;
        let timestamp = request.at.format(TIMESTAMP_FORMAT).to_string();
        debug!(timestamp = %timestamp, "Requesting prediction");

        let response = self
            .client
            .get(url)
            .query(&[("type", "resource"), ("timestamp", timestamp.as_str())])
            .query(&[
                ("cpu", request.current_cpu_millis),
                ("memory", request.current_memory_mib),
            ])
            .send()
            .await
            .map_err(|e| ScalerError::transient("forecast", e))?;

        if !response.status().is_success() {
            return Err(ScalerError::transient(
                "forecast",
                format!("predict returned {}", response.status()),
            ));
        }

        response
            .json::<ForecastResult>()
            .await
            .map_err(|e| ScalerError::transient("forecast", e))
    }
}

/// Locate the newest historical dataset in the data directory.
///
/// The data generator drops files named `resource*.csv`, one per date;
/// lexicographically last is the most recent.
pub fn find_dataset(dir: &Path) -> Result<PathBuf, ScalerError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| ScalerError::WarmUpNotReady(format!("cannot read {}: {e}", dir.display())))?;

    let mut newest: Option<PathBuf> = None;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("resource") && name.ends_with(".csv") {
            let path = entry.path();
            if newest.as_ref().map_or(true, |current| path > *current) {
                newest = Some(path);
            }
        }
    }

    match newest {
        Some(path) => {
            info!(dataset = %path.display(), "Found historical dataset");
            Ok(path)
        }
        None => Err(ScalerError::WarmUpNotReady(format!(
            "no resource*.csv dataset in {}",
            dir.display()
        ))),
    }
}
