use crate::config::types::{Config, HttpConfig, LoginConfig};
use crate::rules::RuleSet;
use crate::ConfigError;
use std::path::Path;
use url::Url;

/// Validates the entire configuration
///
/// Besides field checks this compiles the rule table, so bad patterns and templates
/// are reported here, and creates the save directory if it does not exist yet.
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawl_limits(config)?;
    validate_http_config(&config.http)?;
    if let Some(login) = &config.login {
        validate_login(login)?;
    }

    let rules = config.rule_set()?;
    validate_start_url(&config.start_url, &rules)?;
    validate_save_dir(Path::new(&config.save_dir))?;
    Ok(())
}

/// Validates worker and retry limits
fn validate_crawl_limits(config: &Config) -> Result<(), ConfigError> {
    if config.concurrency < 1 || config.concurrency > 100 {
        return Err(ConfigError::Validation(format!(
            "concurrency must be between 1 and 100, got {}",
            config.concurrency
        )));
    }

    if config.max_retries > 20 {
        return Err(ConfigError::Validation(format!(
            "max-retries must be at most 20, got {}",
            config.max_retries
        )));
    }

    if config.rules.is_empty() {
        return Err(ConfigError::Validation(
            "at least one [[rule]] is required".to_string(),
        ));
    }

    Ok(())
}

fn validate_http_config(config: &HttpConfig) -> Result<(), ConfigError> {
    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty".to_string(),
        ));
    }

    if config.timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "timeout-secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_login(login: &LoginConfig) -> Result<(), ConfigError> {
    parse_http_url(&login.url, "login url").map(|_| ())
}

/// The start URL must be crawlable, otherwise nothing would ever run
fn validate_start_url(start_url: &str, rules: &RuleSet) -> Result<(), ConfigError> {
    let url = parse_http_url(start_url, "start-url")?;

    if rules.is_ignored(url.as_str()) {
        return Err(ConfigError::Validation(format!(
            "start-url '{}' matches an ignore-url pattern",
            start_url
        )));
    }

    if rules.matches(url.as_str()).is_none() {
        return Err(ConfigError::Validation(format!(
            "start-url '{}' does not match any rule",
            url
        )));
    }

    Ok(())
}

fn parse_http_url(value: &str, what: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(value)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid {} '{}': {}", what, value, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "{} '{}' must use http or https",
            what, value
        )));
    }

    Ok(url)
}

/// Makes sure the save directory exists and accepts new files
fn validate_save_dir(path: &Path) -> Result<(), ConfigError> {
    let save_dir_error = |message: String| ConfigError::SaveDir {
        path: path.display().to_string(),
        message,
    };

    if path.as_os_str().is_empty() {
        return Err(save_dir_error("save-dir cannot be empty".to_string()));
    }

    std::fs::create_dir_all(path).map_err(|e| save_dir_error(e.to_string()))?;

    if !path.is_dir() {
        return Err(save_dir_error("not a directory".to_string()));
    }

    let probe = path.join(".sumi-sieve-probe");
    std::fs::write(&probe, b"").map_err(|e| save_dir_error(format!("not writable: {}", e)))?;
    let _ = std::fs::remove_file(&probe);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuleConfig;
    use tempfile::TempDir;

    fn rule(url: &str) -> RuleConfig {
        RuleConfig {
            url: url.to_string(),
            selector: None,
            as_url: None,
            file_path: None,
            paging: false,
            next_page: None,
            follow: true,
        }
    }

    fn create_test_config(save_dir: &Path) -> Config {
        Config {
            start_url: "https://example.com/".to_string(),
            save_dir: save_dir.display().to_string(),
            concurrency: 4,
            max_retries: 3,
            retry_base_delay_ms: 500,
            ignore_url: vec![],
            login: None,
            http: HttpConfig::default(),
            rules: vec![rule(r"https://example\.com/.*")],
        }
    }

    #[test]
    fn test_valid_config() {
        let dir = TempDir::new().unwrap();
        assert!(validate(&create_test_config(dir.path())).is_ok());
    }

    #[test]
    fn test_concurrency_bounds() {
        let dir = TempDir::new().unwrap();
        let mut config = create_test_config(dir.path());

        config.concurrency = 0;
        assert!(matches!(validate(&config), Err(ConfigError::Validation(_))));

        config.concurrency = 101;
        assert!(matches!(validate(&config), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_start_url_must_match_a_rule() {
        let dir = TempDir::new().unwrap();
        let mut config = create_test_config(dir.path());
        config.start_url = "https://other.com/".to_string();
        assert!(matches!(validate(&config), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_start_url_must_not_be_ignored() {
        let dir = TempDir::new().unwrap();
        let mut config = create_test_config(dir.path());
        config.ignore_url = vec![r"https://example\.com/".to_string()];
        assert!(matches!(validate(&config), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_start_url_scheme() {
        let dir = TempDir::new().unwrap();
        let mut config = create_test_config(dir.path());
        config.start_url = "ftp://example.com/".to_string();
        assert!(matches!(validate(&config), Err(ConfigError::InvalidUrl(_))));

        config.start_url = "not a url".to_string();
        assert!(matches!(validate(&config), Err(ConfigError::InvalidUrl(_))));
    }

    #[test]
    fn test_save_dir_is_created() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a").join("b");
        validate(&create_test_config(&nested)).unwrap();
        assert!(nested.is_dir());
    }

    #[test]
    fn test_save_dir_that_is_a_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("file");
        std::fs::write(&file, b"x").unwrap();
        let result = validate(&create_test_config(&file));
        assert!(matches!(result, Err(ConfigError::SaveDir { .. })));
    }

    #[test]
    fn test_requires_rules() {
        let dir = TempDir::new().unwrap();
        let mut config = create_test_config(dir.path());
        config.rules.clear();
        assert!(matches!(validate(&config), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_invalid_login_url() {
        let dir = TempDir::new().unwrap();
        let mut config = create_test_config(dir.path());
        config.login = Some(LoginConfig {
            url: "/login".to_string(),
            formdata: Default::default(),
        });
        assert!(matches!(validate(&config), Err(ConfigError::InvalidUrl(_))));
    }
}
