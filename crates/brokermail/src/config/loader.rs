use std::path::Path;

use crate::config::schema::SyncConfig;
use crate::error::ConfigError;
use crate::secrets::has_secret_source;

use super::schema::AuthType;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<SyncConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<SyncConfig, ConfigError> {
    let config: SyncConfig = serde_json::from_str(content)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_config(config: &SyncConfig) -> Result<(), ConfigError> {
    if config.user_id.trim().is_empty() {
        return Err(ConfigError::invalid("user_id", "must not be empty"));
    }

    let mailbox = &config.mailbox;
    if mailbox.host.trim().is_empty() {
        return Err(ConfigError::invalid("mailbox.host", "must not be empty"));
    }
    if !mailbox.use_tls {
        return Err(ConfigError::Validation {
            message: "TLS is required for mailbox connections".to_string(),
        });
    }
    if mailbox.archive_folder.as_deref() == Some(mailbox.folder.as_str()) {
        return Err(ConfigError::invalid(
            "mailbox.archive_folder",
            "must differ from the polled folder",
        ));
    }
    if let Err(e) = mailbox.search_criteria() {
        return Err(ConfigError::invalid(
            "mailbox.since_date",
            format!("expected YYYY-MM-DD: {}", e),
        ));
    }

    let auth = &mailbox.auth;
    let has_credentials = match auth.auth_type {
        AuthType::Password => has_secret_source(
            auth.password.as_deref(),
            auth.password_file.as_deref(),
            auth.password_env_var.as_deref(),
        ),
        AuthType::OAuth2 => has_secret_source(
            auth.access_token.as_deref(),
            auth.access_token_file.as_deref(),
            auth.access_token_env_var.as_deref(),
        ),
    };
    if !has_credentials {
        return Err(ConfigError::invalid(
            "mailbox.auth",
            "no credential source configured",
        ));
    }

    let sync = &config.sync;
    if sync.poll_interval_secs == 0 {
        return Err(ConfigError::invalid("sync.poll_interval_secs", "must be at least 1"));
    }
    if sync.max_messages_per_sync == 0 {
        return Err(ConfigError::invalid("sync.max_messages_per_sync", "must be at least 1"));
    }
    if sync.chunk_size == 0 {
        return Err(ConfigError::invalid("sync.chunk_size", "must be at least 1"));
    }
    if sync.archive_chunk_size == 0 {
        return Err(ConfigError::invalid("sync.archive_chunk_size", "must be at least 1"));
    }

    let retry = &config.retry;
    if retry.max_attempts == 0 {
        return Err(ConfigError::invalid("retry.max_attempts", "must be at least 1"));
    }
    if !(retry.backoff_factor >= 1.0) {
        return Err(ConfigError::invalid("retry.backoff_factor", "must be >= 1.0"));
    }
    if retry.max_delay_ms < retry.base_delay_ms {
        return Err(ConfigError::invalid(
            "retry.max_delay_ms",
            "must not be smaller than base_delay_ms",
        ));
    }

    if config.circuit_breaker.failure_threshold == 0 {
        return Err(ConfigError::invalid(
            "circuit_breaker.failure_threshold",
            "must be at least 1",
        ));
    }

    if let Some(classifier) = &config.classifier {
        if !classifier.endpoint.starts_with("http://") && !classifier.endpoint.starts_with("https://")
        {
            return Err(ConfigError::invalid(
                "classifier.endpoint",
                "must be an http(s) URL",
            ));
        }
        if !(0.0..=1.0).contains(&classifier.auto_archive_confidence) {
            return Err(ConfigError::invalid(
                "classifier.auto_archive_confidence",
                "must be between 0.0 and 1.0",
            ));
        }
        if classifier.timeout_secs == 0 {
            return Err(ConfigError::invalid("classifier.timeout_secs", "must be at least 1"));
        }
    }

    Ok(())
}
