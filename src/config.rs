use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "base_url")]
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(rename = "ffmpeg_path")]
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg_path: String,
    #[serde(rename = "ffprobe_path")]
    #[serde(default = "default_ffprobe")]
    pub ffprobe_path: String,
    #[serde(rename = "request_timeout_secs")]
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(rename = "poll_interval_secs")]
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: f64,
    #[serde(rename = "poll_max_attempts")]
    #[serde(default)]
    pub poll_max_attempts: Option<u32>,
    #[serde(rename = "poll_timeout_secs")]
    #[serde(default)]
    pub poll_timeout_secs: Option<f64>,
    #[serde(rename = "seam_trim_seconds")]
    #[serde(default = "default_seam_trim")]
    pub seam_trim_seconds: f64,
    #[serde(rename = "transition_duration")]
    #[serde(default = "default_transition_duration")]
    pub transition_duration: f64,
    #[serde(rename = "transition_style")]
    #[serde(default = "default_transition_style")]
    pub transition_style: String,
    #[serde(rename = "model_switch_threshold")]
    #[serde(default = "default_switch_threshold")]
    pub model_switch_threshold: u32,
}

fn default_base_url() -> String {
    "https://aisandbox-pa.googleapis.com/v1".to_string()
}

fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe() -> String {
    "ffprobe".to_string()
}

fn default_request_timeout() -> u64 {
    180
}

fn default_poll_interval() -> f64 {
    8.0
}

fn default_seam_trim() -> f64 {
    1.0
}

fn default_transition_duration() -> f64 {
    0.45
}

fn default_transition_style() -> String {
    "fade".to_string()
}

fn default_switch_threshold() -> u32 {
    3
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            ffmpeg_path: default_ffmpeg(),
            ffprobe_path: default_ffprobe(),
            request_timeout_secs: default_request_timeout(),
            poll_interval_secs: default_poll_interval(),
            poll_max_attempts: None,
            poll_timeout_secs: None,
            seam_trim_seconds: default_seam_trim(),
            transition_duration: default_transition_duration(),
            transition_style: default_transition_style(),
            model_switch_threshold: default_switch_threshold(),
        }
    }
}

impl Config {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).await.map_err(|e| Error::Config {
            path: path.display().to_string(),
            reason: format!("read failed: {}", e),
        })?;
        let config: Config = serde_json::from_str(&content).map_err(|e| Error::Config {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        if config.base_url.is_empty() {
            return Err(Error::Config {
                path: path.display().to_string(),
                reason: "base_url must not be empty".to_string(),
            });
        }
        if config.seam_trim_seconds < 0.0 {
            return Err(Error::Config {
                path: path.display().to_string(),
                reason: "seam_trim_seconds must be >= 0".to_string(),
            });
        }

        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.poll_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let cfg: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.base_url, "https://aisandbox-pa.googleapis.com/v1");
        assert_eq!(cfg.seam_trim_seconds, 1.0);
        assert_eq!(cfg.transition_duration, 0.45);
        assert_eq!(cfg.transition_style, "fade");
        assert_eq!(cfg.model_switch_threshold, 3);
        assert!(cfg.poll_max_attempts.is_none());
        assert!(cfg.poll_timeout_secs.is_none());
    }

    #[test]
    fn explicit_fields_override_defaults() {
        let cfg: Config = serde_json::from_str(
            r#"{"transition_duration": 0.0, "poll_max_attempts": 40, "ffmpeg_path": "/opt/ffmpeg"}"#,
        )
        .unwrap();
        assert_eq!(cfg.transition_duration, 0.0);
        assert_eq!(cfg.poll_max_attempts, Some(40));
        assert_eq!(cfg.ffmpeg_path, "/opt/ffmpeg");
    }
}
