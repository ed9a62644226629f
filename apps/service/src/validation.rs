use std::net::IpAddr;

use anyhow::{Result, anyhow};
use chrono::NaiveTime;
use url::Url;

/// Validation results with specific error messages
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub error: Option<String>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self { is_valid: true, error: None }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self { is_valid: false, error: Some(msg.into()) }
    }

    pub fn to_result(&self) -> Result<()> {
        if self.is_valid {
            Ok(())
        } else {
            Err(anyhow!(self.error.clone().unwrap_or_else(|| "Validation failed".to_string())))
        }
    }
}

/// Validate a probe address (IP address or hostname)
pub fn validate_probe_address(target: &str) -> ValidationResult {
    if target.trim().is_empty() {
        return ValidationResult::err("Address cannot be empty");
    }

    if target.parse::<IpAddr>().is_ok() {
        return ValidationResult::ok();
    }

    if target.contains(' ') {
        return ValidationResult::err("Address cannot contain spaces");
    }

    // Also keeps the address from being read as a `ping` option
    if target.starts_with('-') || target.ends_with('-') {
        return ValidationResult::err("Hostname cannot start or end with hyphen");
    }

    if target.len() > 253 {
        return ValidationResult::err("Hostname too long (max 253 characters)");
    }

    if target.split('.').any(str::is_empty) {
        return ValidationResult::err("Hostname cannot contain empty labels");
    }

    if target.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-') {
        ValidationResult::ok()
    } else {
        ValidationResult::err("Invalid hostname. Use IP address or valid hostname")
    }
}

/// Validate a host display name
pub fn validate_host_name(name: &str) -> ValidationResult {
    let trimmed = name.trim();

    if trimmed.is_empty() {
        return ValidationResult::err("Name cannot be empty");
    }

    if trimmed.len() > 100 {
        return ValidationResult::err("Name too long (max 100 characters)");
    }

    // The name is used in audit log file names
    if trimmed.contains(['/', '\\']) {
        return ValidationResult::err("Name cannot contain path separators");
    }

    ValidationResult::ok()
}

/// Validate a consecutive failure threshold
pub fn validate_threshold(threshold: i64) -> ValidationResult {
    if threshold < 1 {
        return ValidationResult::err(format!("Threshold must be at least 1 (got {threshold})"));
    }

    if threshold > i64::from(u32::MAX) {
        return ValidationResult::err("Threshold too large");
    }

    ValidationResult::ok()
}

/// Validate the cycle interval
pub fn validate_interval(interval_secs: u64) -> ValidationResult {
    if interval_secs == 0 {
        return ValidationResult::err("Interval must be at least 1 second");
    }

    if interval_secs > 86400 {
        return ValidationResult::err("Interval too long (max 24 hours)");
    }

    ValidationResult::ok()
}

/// Validate the probe timeout against the cycle interval
pub fn validate_timeout(timeout_ms: u64, interval_secs: u64) -> ValidationResult {
    if timeout_ms == 0 {
        return ValidationResult::err("Timeout must be at least 1 millisecond");
    }

    if timeout_ms >= interval_secs.saturating_mul(1000) {
        return ValidationResult::err("Timeout must be less than interval");
    }

    ValidationResult::ok()
}

/// Parse a daily report time in 24h `HH:MM` format
pub fn parse_report_time(value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|e| anyhow!("Invalid report time '{value}' (expected HH:MM): {e}"))
}

/// Validate a webhook endpoint
pub fn validate_webhook_url(target: &str) -> ValidationResult {
    match Url::parse(target) {
        Ok(url) => {
            let scheme = url.scheme();
            if scheme != "http" && scheme != "https" {
                return ValidationResult::err(format!(
                    "Invalid scheme '{scheme}'. Must be http or https"
                ));
            }

            if url.host_str().is_none() {
                return ValidationResult::err("URL must have a valid host");
            }

            ValidationResult::ok()
        }
        Err(e) => ValidationResult::err(format!("Invalid URL: {e}")),
    }
}
