use std::{str::FromStr, sync::OnceLock, time::Duration};

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Process-wide settings, read once from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: Option<String>,
    pub api_base: String,
    pub chat_model: String,
    pub image_model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub image_size: String,
    pub image_quality: String,
    pub download_timeout: Duration,
    pub request_timeout: Duration,
    pub max_upload_bytes: usize,
    pub session_ttl: Duration,
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: "https://api.openai.com/v1".to_string(),
            chat_model: "gpt-4o".to_string(),
            image_model: "dall-e-3".to_string(),
            max_tokens: 1500,
            temperature: 0.7,
            image_size: "1024x1024".to_string(),
            image_quality: "standard".to_string(),
            download_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(120),
            max_upload_bytes: 10 * 1024 * 1024,
            session_ttl: Duration::from_secs(60 * 60),
            port: 8080,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let string = |name: &str, default: String| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or(default)
        };

        Self {
            api_key: lookup("OPENAI_API_KEY")
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
            api_base: string("OPENAI_API_BASE", defaults.api_base)
                .trim_end_matches('/')
                .to_string(),
            chat_model: string("OUTFIT_CHAT_MODEL", defaults.chat_model),
            image_model: string("OUTFIT_IMAGE_MODEL", defaults.image_model),
            max_tokens: parsed(&lookup, "OUTFIT_MAX_TOKENS").unwrap_or(defaults.max_tokens),
            temperature: parsed(&lookup, "OUTFIT_TEMPERATURE").unwrap_or(defaults.temperature),
            image_size: string("OUTFIT_IMAGE_SIZE", defaults.image_size),
            image_quality: string("OUTFIT_IMAGE_QUALITY", defaults.image_quality),
            download_timeout: parsed(&lookup, "OUTFIT_DOWNLOAD_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.download_timeout),
            request_timeout: parsed(&lookup, "OUTFIT_REQUEST_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            max_upload_bytes: parsed::<usize>(&lookup, "OUTFIT_MAX_UPLOAD_MB")
                .map(|mb| mb * 1024 * 1024)
                .unwrap_or(defaults.max_upload_bytes),
            session_ttl: parsed(&lookup, "OUTFIT_SESSION_TTL_MINS")
                .map(|mins: u64| Duration::from_secs(mins * 60))
                .unwrap_or(defaults.session_ttl),
            port: parsed(&lookup, "PORT").unwrap_or(defaults.port),
        }
    }

    /// First few characters of the key, safe for logs.
    pub fn masked_key(&self) -> Option<String> {
        self.api_key.as_deref().map(mask_key)
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    lookup(name).and_then(|v| v.trim().parse().ok())
}

pub fn mask_key(key: &str) -> String {
    let prefix: String = key.chars().take(6).collect();
    format!("{prefix}***")
}

/// Returns the process configuration, loading it on first use.
pub fn get() -> &'static Config {
    CONFIG.get_or_init(Config::from_env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn uses_defaults_when_nothing_is_set() {
        let config = Config::from_lookup(|_| None);
        assert_eq!(config.api_key, None);
        assert_eq!(config.chat_model, "gpt-4o");
        assert_eq!(config.image_model, "dall-e-3");
        assert_eq!(config.max_tokens, 1500);
        assert_eq!(config.download_timeout, Duration::from_secs(30));
        assert_eq!(config.request_timeout, Duration::from_secs(120));
        assert_eq!(config.max_upload_bytes, 10 * 1024 * 1024);
        assert_eq!(config.session_ttl, Duration::from_secs(3600));
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn reads_overrides_and_ignores_garbage_numbers() {
        let config = Config::from_lookup(lookup_from(&[
            ("OPENAI_API_KEY", "  sk-test-123  "),
            ("OPENAI_API_BASE", "http://localhost:9999/v1/"),
            ("OUTFIT_MAX_TOKENS", "not-a-number"),
            ("OUTFIT_DOWNLOAD_TIMEOUT_SECS", "5"),
            ("OUTFIT_REQUEST_TIMEOUT_SECS", "45"),
            ("OUTFIT_MAX_UPLOAD_MB", "20"),
            ("OUTFIT_SESSION_TTL_MINS", "15"),
            ("PORT", "3000"),
        ]));
        assert_eq!(config.api_key.as_deref(), Some("sk-test-123"));
        assert_eq!(config.api_base, "http://localhost:9999/v1");
        assert_eq!(config.max_tokens, 1500);
        assert_eq!(config.download_timeout, Duration::from_secs(5));
        assert_eq!(config.request_timeout, Duration::from_secs(45));
        assert_eq!(config.max_upload_bytes, 20 * 1024 * 1024);
        assert_eq!(config.session_ttl, Duration::from_secs(15 * 60));
        assert_eq!(config.port, 3000);
    }

    #[test]
    fn blank_key_counts_as_missing() {
        let config = Config::from_lookup(lookup_from(&[("OPENAI_API_KEY", "   ")]));
        assert!(config.api_key.is_none());
    }

    #[test]
    fn masks_all_but_prefix() {
        assert_eq!(mask_key("sk-abcdefghijk"), "sk-abc***");
        assert_eq!(mask_key("sk"), "sk***");
    }
}
