use super::models::Config;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("relay.default_user_agent must not be empty")]
    EmptyDefaultUserAgent,

    #[error("relay.storage_dir must not be empty")]
    EmptyStorageDir,

    #[error("relay.chunk_size must be positive")]
    InvalidChunkSize,

    #[error("relay.max_redirects must be positive")]
    InvalidMaxRedirects,

    #[error("Timeout must be positive: {field} = 0")]
    InvalidTimeout { field: &'static str },

    #[error("Retention TTL must be positive: job_ttl_days = {0}")]
    InvalidRetentionTTL(u32),

    #[error("client.user_agents must contain at least one entry")]
    NoUserAgents,

    #[error("client.relay_url '{url}' is not an http(s) url")]
    InvalidRelayUrl { url: String },
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_relay(config)?;
    validate_client(config)?;
    validate_retention(config)?;
    Ok(())
}

fn validate_relay(config: &Config) -> Result<(), ValidationError> {
    let relay = &config.relay;

    if relay.default_user_agent.trim().is_empty() {
        return Err(ValidationError::EmptyDefaultUserAgent);
    }

    if relay.storage_dir.as_os_str().is_empty() {
        return Err(ValidationError::EmptyStorageDir);
    }

    if relay.chunk_size.as_u64() == 0 {
        return Err(ValidationError::InvalidChunkSize);
    }

    if relay.max_redirects == 0 {
        return Err(ValidationError::InvalidMaxRedirects);
    }

    for (field, value) in [
        ("connect_timeout_secs", relay.connect_timeout_secs),
        ("request_timeout_secs", relay.request_timeout_secs),
        ("render_timeout_secs", relay.render_timeout_secs),
    ] {
        if value == 0 {
            return Err(ValidationError::InvalidTimeout { field });
        }
    }

    Ok(())
}

fn validate_client(config: &Config) -> Result<(), ValidationError> {
    if config.client.user_agents.iter().all(|ua| ua.trim().is_empty()) {
        return Err(ValidationError::NoUserAgents);
    }

    let valid = url::Url::parse(&config.client.relay_url)
        .map(|url| matches!(url.scheme(), "http" | "https"))
        .unwrap_or(false);
    if !valid {
        return Err(ValidationError::InvalidRelayUrl {
            url: config.client.relay_url.clone(),
        });
    }

    Ok(())
}

fn validate_retention(config: &Config) -> Result<(), ValidationError> {
    if config.retention.job_ttl_days == 0 {
        return Err(ValidationError::InvalidRetentionTTL(0));
    }
    Ok(())
}
