use crate::config::types::Config;
use crate::config::validation::{validate, validate_proxy_address};
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads and parses a configuration file from the given path
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parses and validates configuration from TOML text
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

/// Computes a SHA-256 hash of the configuration file content
///
/// Stored alongside snapshots so a restart can tell whether the
/// configuration changed since the snapshot was written.
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Loads a configuration and returns both the config and its hash
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}

/// Reads a proxy list file: one address per line
///
/// Blank lines and lines starting with `#` are skipped. Invalid addresses
/// are logged and dropped so one bad line does not discard the whole list.
pub fn load_proxy_list(path: &Path) -> Result<Vec<String>, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    Ok(parse_proxy_list(&content))
}

/// Parses the contents of a proxy list file; see [`load_proxy_list`]
pub fn parse_proxy_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter(|line| match validate_proxy_address(line) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Skipping proxy list entry: {}", e);
                false
            }
        })
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_valid_config() {
        let config_content = r#"
seeds = ["https://example.com/"]

[scheduler]
max-retries = 5
lease-duration-ms = 20000

[proxy-pool]
cooldown-threshold = 3
proxies = ["http://10.0.0.1:8080", "http://10.0.0.2:8080"]

[throttle]
max-concurrency = 4
min-interval-ms = 500

[[throttle.domain]]
domain = "slow.example.com"
max-concurrency = 1
min-interval-ms = 5000

[storage]
database-path = "./dispatch.db"
"#;

        let file = create_temp_config(config_content);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.scheduler.max_retries, 5);
        assert_eq!(config.scheduler.lease_duration(), Duration::from_secs(20));
        assert_eq!(config.scheduler.reclaim_interval(), Duration::from_secs(10));
        assert_eq!(config.proxy_pool.cooldown_threshold, 3);
        assert_eq!(config.proxy_pool.proxies.len(), 2);
        assert_eq!(config.throttle.max_concurrency, 4);
        assert_eq!(config.throttle.domain.len(), 1);
        assert_eq!(config.throttle.domain[0].max_concurrency, Some(1));
        assert_eq!(
            config.storage.database_path.as_deref(),
            Some("./dispatch.db")
        );
        assert_eq!(config.seeds.len(), 1);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_config("").unwrap();

        assert_eq!(config.scheduler.max_retries, 3);
        assert_eq!(config.scheduler.lease_duration(), Duration::from_secs(30));
        assert_eq!(config.scheduler.reclaim_interval(), Duration::from_secs(15));
        assert_eq!(config.proxy_pool.cooldown_threshold, 5);
        assert_eq!(config.throttle.max_concurrency, 2);
        assert!(config.storage.database_path.is_none());
        assert!(config.seeds.is_empty());
    }

    #[test]
    fn test_load_config_with_invalid_path() {
        let result = load_config(Path::new("/nonexistent/dispatch.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_load_config_with_invalid_toml() {
        let file = create_temp_config("this is not valid TOML {{{");
        let result = load_config(file.path());
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_config_with_validation_error() {
        let file = create_temp_config("[throttle]\nmax-concurrency = 0\n");
        let result = load_config(file.path());
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_compute_config_hash() {
        let file = create_temp_config("test content");

        let hash1 = compute_config_hash(file.path()).unwrap();
        let hash2 = compute_config_hash(file.path()).unwrap();

        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64);
    }

    #[test]
    fn test_proxy_list() {
        let file = create_temp_config(
            "# egress pool\nhttp://10.0.0.1:8080\n\n  socks5://10.0.0.2:1080  \nnot a proxy\ndirect\n",
        );
        let proxies = load_proxy_list(file.path()).unwrap();
        assert_eq!(
            proxies,
            vec!["http://10.0.0.1:8080", "socks5://10.0.0.2:1080", "direct"]
        );

        assert!(matches!(
            load_proxy_list(Path::new("/nonexistent/proxies.txt")),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn test_proxy_validation_settings() {
        let config = parse_config(
            "[proxy-pool]\nvalidation-url = \"https://example.com/health\"\nproxy-files = [\"proxies.txt\"]\n",
        )
        .unwrap();
        assert_eq!(
            config.proxy_pool.validation_url.as_deref(),
            Some("https://example.com/health")
        );
        assert_eq!(config.proxy_pool.proxy_files, vec!["proxies.txt"]);
        assert_eq!(config.proxy_pool.validation_concurrency, 16);

        let result = parse_config("[proxy-pool]\nvalidation-url = \"ftp://example.com/\"\n");
        assert!(matches!(result, Err(ConfigError::Validation(_))));
        let result = parse_config("[proxy-pool]\nvalidation-concurrency = 0\n");
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_different_content_different_hash() {
        let file1 = create_temp_config("content 1");
        let file2 = create_temp_config("content 2");

        let hash1 = compute_config_hash(file1.path()).unwrap();
        let hash2 = compute_config_hash(file2.path()).unwrap();

        assert_ne!(hash1, hash2);
    }
}
