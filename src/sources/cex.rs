//! Centralized-exchange prices via the external `gofer` price-fetch tool.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, error, info};
use serde_json::Value;
use tokio::process::Command;

use super::CexSource;
use crate::envelope::{format_timestamp, RawObservation};
use crate::utils::error::{Error, Result};

/// Runs `<gofer> data <label> -o orcfax` once per feed.
#[derive(Debug, Clone)]
pub struct GoferSource {
    gofer: PathBuf,
    timeout: Duration,
}

impl GoferSource {
    pub fn new(gofer: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self { gofer: gofer.into(), timeout }
    }
}

#[async_trait]
impl CexSource for GoferSource {
    async fn fetch(&self, label: &str) -> Result<Option<RawObservation>> {
        debug!("fetching cex feeds using gofer: {} ('{}')", self.gofer.display(), label);
        let run = Command::new(&self.gofer)
            .args(["data", label, "-o", "orcfax"])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, run).await {
            | Ok(Ok(output)) => output,
            | Ok(Err(e)) => {
                return Err(Error::DataError(format!(
                    "cannot run gofer {}: {}",
                    self.gofer.display(),
                    e
                )))
            }
            | Err(_) => {
                error!("gofer timed out after {:?} for '{}'", self.timeout, label);
                return Ok(None);
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            info!("stderr: {}", stderr.trim());
        }
        if !output.status.success() {
            error!("call failed with: {} ('{}')", output.status, label);
            return Ok(None);
        }
        let parsed: Value = match serde_json::from_slice(&output.stdout) {
            | Ok(v) => v,
            | Err(e) => {
                error!("json decode failed: {} ('{}')", e, label);
                return Ok(None);
            }
        };
        Ok(parse_gofer_output(&parsed, label))
    }
}

/// Extract the observation for `label` from gofer's JSON output.
///
/// The entry keyed by the label is used; when it wraps its fields in a
/// `message` object that object is taken instead.
pub fn parse_gofer_output(output: &Value, label: &str) -> Option<RawObservation> {
    let entry = output.get(label)?.as_object()?;
    let body = match entry.get("message").and_then(Value::as_object) {
        | Some(message) => message.clone(),
        | None => entry.clone(),
    };
    if body.is_empty() {
        return None;
    }
    let timestamp = match body.get("timestamp") {
        | Some(Value::String(s)) => s.clone(),
        | Some(other) => other.to_string(),
        | None => format_timestamp(Utc::now()),
    };
    Some(RawObservation::new(label, timestamp, body))
}
