use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::config::LoggingConfig;

/// One completed proxy request.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AccessLogEntry {
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
    pub method: String,
    pub target: Option<String>,
    pub mode: Option<&'static str>,
    pub status: u16,
    /// Milliseconds until the response head was ready; streamed bodies may still be flowing.
    pub ttfb_ms: u64,
}

enum AccessSink {
    Disabled,
    Tracing,
    File(Mutex<tokio::fs::File>),
}

/// Writes access log lines to tracing or to an append-only JSON lines file.
pub struct AccessLogger {
    sink: AccessSink,
}

impl AccessLogger {
    pub async fn new(config: &LoggingConfig) -> Result<Self> {
        let sink = match config.access_log.trim() {
            "" => return Ok(Self::disabled()),
            "-" => AccessSink::Tracing,
            path => {
                if let Some(parent) = std::path::Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() {
                        tokio::fs::create_dir_all(parent).await.with_context(|| {
                            format!("Failed to create access log directory: {}", parent.display())
                        })?;
                    }
                }

                let file = tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .await
                    .with_context(|| format!("Failed to open access log: {}", path))?;

                info!("Writing access log to {}", path);
                AccessSink::File(Mutex::new(file))
            }
        };

        Ok(Self { sink })
    }

    pub fn disabled() -> Self {
        Self {
            sink: AccessSink::Disabled,
        }
    }

    /// Record a request once its response head is ready. Write failures are logged, never returned.
    pub async fn log_request(
        &self,
        request_id: &str,
        method: &str,
        target: Option<&str>,
        mode: Option<&'static str>,
        status: u16,
        time_to_headers: Duration,
    ) {
        let entry = AccessLogEntry {
            timestamp: Utc::now(),
            request_id: request_id.to_string(),
            method: method.to_string(),
            target: target.map(String::from),
            mode,
            status,
            ttfb_ms: time_to_headers.as_millis() as u64,
        };

        match &self.sink {
            AccessSink::Disabled => {}
            AccessSink::Tracing => {
                info!(
                    target: "access",
                    request_id = %entry.request_id,
                    method = %entry.method,
                    target_url = entry.target.as_deref().unwrap_or("-"),
                    mode = entry.mode.unwrap_or("-"),
                    status = entry.status,
                    ttfb_ms = entry.ttfb_ms,
                    "response started"
                );
            }
            AccessSink::File(writer) => {
                if let Err(e) = Self::write_line(writer, &entry).await {
                    error!("Failed to write access log entry: {}", e);
                }
            }
        }
    }

    async fn write_line(writer: &Mutex<tokio::fs::File>, entry: &AccessLogEntry) -> Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let mut file = writer.lock().await;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
