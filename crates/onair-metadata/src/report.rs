//! Playback failure reports, submitted on the listener's request.

use onair_proto::config::MetadataConfig;
use onair_proto::protocol::PlaybackError;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Result;
use crate::transport::post_json;

/// Numeric codes understood by the report collector.
const CODE_UNSPECIFIED: i32 = 1000;
const CODE_NETWORK: i32 = 2001;
const CODE_TIMEOUT: i32 = 2002;

/// Body of `POST <report_url>`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybackReport {
    pub station_id: String,
    pub stream_url: String,
    pub error_code: i32,
    pub error_message: String,
    pub device_info: String,
    pub app_version: String,
    pub user_agent: String,
    pub country: String,
}

/// Collector acknowledgement, e.g. `{"status":"success","message":"Report received"}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportReceipt {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

impl PlaybackReport {
    pub fn new(error: &PlaybackError, app_version: &str, user_agent: &str) -> Self {
        Self {
            station_id: or_unknown(&error.station_id),
            stream_url: or_unknown(&error.url),
            error_code: error_code(&error.code),
            error_message: format!("playback failed: {}", error.code),
            device_info: format!("{} {}", std::env::consts::OS, std::env::consts::ARCH),
            app_version: app_version.to_string(),
            user_agent: or_unknown(user_agent),
            country: country_from_locale(std::env::var("LANG").ok().as_deref()),
        }
    }
}

/// Sends reports to the configured collector.
#[derive(Clone)]
pub struct PlaybackReporter {
    client: reqwest::Client,
    url: String,
    user_agent: String,
    app_version: String,
}

impl PlaybackReporter {
    pub fn new(client: reqwest::Client, config: &MetadataConfig, app_version: &str) -> Self {
        Self {
            client,
            url: config.report_url.clone(),
            user_agent: config.user_agent.clone(),
            app_version: app_version.to_string(),
        }
    }

    /// Report `error`.  Any non-2xx reply is an error.
    pub async fn report_playback_error(&self, error: &PlaybackError) -> Result<ReportReceipt> {
        let report = PlaybackReport::new(error, &self.app_version, &self.user_agent);
        match post_json::<_, ReportReceipt>(&self.client, &self.url, &report).await {
            Ok(receipt) => {
                info!(
                    "[report] {} ({}) sent: {}",
                    report.station_id, report.error_code, receipt.status
                );
                Ok(receipt)
            }
            Err(e) => {
                warn!("[report] {} not sent: {}", report.station_id, e);
                Err(e)
            }
        }
    }
}

fn error_code(code: &str) -> i32 {
    match code {
        "network" | "error" => CODE_NETWORK,
        "timeout" => CODE_TIMEOUT,
        _ => CODE_UNSPECIFIED,
    }
}

fn or_unknown(s: &str) -> String {
    match s.trim() {
        "" => "unknown".to_string(),
        s => s.to_string(),
    }
}

/// Region part of a POSIX locale: `en_GB.UTF-8` → `GB`.
fn country_from_locale(locale: Option<&str>) -> String {
    locale
        .and_then(|l| l.split(['.', '@']).next())
        .and_then(|l| l.split_once('_'))
        .map(|(_, region)| region)
        .filter(|r| r.len() == 2 && r.chars().all(|c| c.is_ascii_alphabetic()))
        .map(str::to_ascii_uppercase)
        .unwrap_or_else(|| "unknown".to_string())
}
