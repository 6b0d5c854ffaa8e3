use std::collections::HashSet;

use crate::provider::ProviderRegistry;
use crate::transport::header_map_from_pairs;

use super::{AppConfig, ConfigError};

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig, registry: &ProviderRegistry) -> Result<(), ConfigError> {
    validate_transport(config)?;
    validate_channels(config, registry)?;
    validate_log_level(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_transport(config: &AppConfig) -> Result<(), ConfigError> {
    let transport = &config.transport;
    if transport.pool_max_idle_per_host == 0 {
        return Err(validation_err(
            "transport.pool_max_idle_per_host must be greater than 0",
        ));
    }
    if transport.request_timeout_secs == 0 {
        return Err(validation_err(
            "transport.request_timeout_secs must be greater than 0",
        ));
    }
    if transport.connect_timeout_secs == 0 {
        return Err(validation_err(
            "transport.connect_timeout_secs must be greater than 0",
        ));
    }
    if transport.stream_channel_capacity == 0 {
        return Err(validation_err(
            "transport.stream_channel_capacity must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_channels(config: &AppConfig, registry: &ProviderRegistry) -> Result<(), ConfigError> {
    if config.channels.is_empty() {
        return Err(validation_err("channels cannot be empty"));
    }

    let mut names = HashSet::new();
    for channel in &config.channels {
        if channel.name.trim().is_empty() {
            return Err(validation_err("channel name cannot be empty"));
        }
        if !names.insert(channel.name.as_str()) {
            return Err(validation_err(format!(
                "Duplicate channel name '{}'",
                channel.name
            )));
        }
        if !channel.base_url.starts_with("http://") && !channel.base_url.starts_with("https://") {
            return Err(validation_err(format!(
                "Channel '{}': base_url must start with http:// or https://",
                channel.name
            )));
        }
        if url::Url::parse(&channel.base_url).is_err() {
            return Err(validation_err(format!(
                "Channel '{}': base_url is not a valid URL",
                channel.name
            )));
        }
        if channel.api_key.trim().is_empty() {
            return Err(validation_err(format!(
                "Channel '{}': api_key cannot be empty",
                channel.name
            )));
        }
        if !registry.contains(&channel.provider) {
            return Err(validation_err(format!(
                "Channel '{}': unknown provider '{}'. Must be one of: {}",
                channel.name,
                channel.provider,
                registry.names().join(", ")
            )));
        }
        header_map_from_pairs(
            channel
                .headers
                .iter()
                .map(|(name, value)| (name.as_str(), value.as_str())),
        )
        .map_err(|err| validation_err(format!("Channel '{}': {err}", channel.name)))?;
        validate_proxy_url(&channel.name, channel.proxy.as_deref())?;
    }
    Ok(())
}

fn validate_proxy_url(channel: &str, proxy: Option<&str>) -> Result<(), ConfigError> {
    let Some(proxy) = proxy.map(str::trim) else {
        return Ok(());
    };
    if proxy.is_empty() {
        return Err(validation_err(format!(
            "Channel '{channel}': proxy cannot be empty when set"
        )));
    }
    let parsed = url::Url::parse(proxy).map_err(|err| {
        validation_err(format!("Channel '{channel}': invalid proxy URL: {err}"))
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(validation_err(format!(
            "Channel '{channel}': proxy scheme must be http or https"
        )));
    }
    Ok(())
}

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let valid_levels = [
        "DEBUG", "INFO", "WARNING", "WARN", "ERROR", "CRITICAL", "TRACE", "DISABLED",
    ];
    if !valid_levels.contains(&config.logging.level.to_uppercase().as_str()) {
        return Err(validation_err(format!(
            "logging.level must be one of {valid_levels:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChannelConfig, LoggingConfig, TransportConfig};

    fn make_valid_config() -> AppConfig {
        AppConfig {
            transport: TransportConfig::default(),
            logging: LoggingConfig::default(),
            channels: vec![ChannelConfig {
                name: "primary".to_string(),
                provider: "openai".to_string(),
                base_url: "https://api.example.com/v1".to_string(),
                api_key: "sk-test".to_string(),
                headers: std::collections::BTreeMap::new(),
                proxy: None,
                api_version: None,
            }],
        }
    }

    fn validate(config: &AppConfig) -> Result<(), ConfigError> {
        validate_config(config, &ProviderRegistry::with_builtins())
    }

    #[test]
    fn test_valid_config() {
        assert!(validate(&make_valid_config()).is_ok());
    }

    #[test]
    fn test_empty_channels() {
        let mut config = make_valid_config();
        config.channels.clear();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_duplicate_channel_name() {
        let mut config = make_valid_config();
        config.channels.push(config.channels[0].clone());
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("Duplicate channel name"));
    }

    #[test]
    fn test_invalid_base_url() {
        let mut config = make_valid_config();
        config.channels[0].base_url = "ftp://example.com".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_empty_api_key() {
        let mut config = make_valid_config();
        config.channels[0].api_key = "  ".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_unknown_provider() {
        let mut config = make_valid_config();
        config.channels[0].provider = "anthropic".to_string();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("unknown provider 'anthropic'"));
        assert!(err.to_string().contains("gemini, openai"));
    }

    #[test]
    fn test_unknown_provider_against_empty_registry() {
        let config = make_valid_config();
        assert!(validate_config(&config, &ProviderRegistry::new()).is_err());
    }

    #[test]
    fn test_zero_channel_capacity() {
        let mut config = make_valid_config();
        config.transport.stream_channel_capacity = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = make_valid_config();
        config.logging.level = "VERBOSE".to_string();
        assert!(validate(&config).is_err());
        config.logging.level = "warning".to_string();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_invalid_header_override() {
        let mut config = make_valid_config();
        config.channels[0]
            .headers
            .insert("bad header".to_string(), "x".to_string());
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_invalid_proxy_url() {
        let mut config = make_valid_config();
        config.channels[0].proxy = Some("bad-proxy".to_string());
        assert!(validate(&config).is_err());
        config.channels[0].proxy = Some("http://127.0.0.1:8080".to_string());
        assert!(validate(&config).is_ok());
    }
}
