// Configuration from environment variables with best-effort .env support

use std::collections::HashMap;
use std::path::Path;

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;

static CONFIG: OnceCell<AppConfig> = OnceCell::new();

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub target_api_url: String,
    pub anthropic_api_url: String,
    pub log_level: String,
    pub debug: bool,
    pub debug_log_file: String,
    pub cache_path: String,
    pub cache_ttl_hours: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            target_api_url: "https://open.bigmodel.cn/api/coding/paas/v4".to_string(),
            anthropic_api_url: "https://open.bigmodel.cn/api/anthropic".to_string(),
            log_level: "info".to_string(),
            debug: false,
            debug_log_file: "debug.json".to_string(),
            cache_path: "image_cache.db".to_string(),
            cache_ttl_hours: 24,
        }
    }
}

/// Resolve the configuration once. Real environment variables take
/// precedence over `.env` entries; a missing `.env` is not an error.
pub fn init() {
    let dotenv = match parse_dotenv(Path::new(".env")) {
        Some(vars) => vars,
        None => {
            tracing::info!(".env not found, using environment variables and defaults");
            HashMap::new()
        }
    };

    let lookup = |key: &str| -> Option<String> {
        std::env::var(key)
            .ok()
            .filter(|v| !v.is_empty())
            .or_else(|| dotenv.get(key).cloned())
    };

    let defaults = AppConfig::default();
    let config = AppConfig {
        port: lookup("PORT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.port),
        target_api_url: lookup("TARGET_API_URL").unwrap_or(defaults.target_api_url),
        anthropic_api_url: lookup("ANTHROPIC_API_URL").unwrap_or(defaults.anthropic_api_url),
        log_level: lookup("LOG_LEVEL").unwrap_or(defaults.log_level),
        debug: lookup("DEBUG")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.debug),
        debug_log_file: lookup("DEBUG_LOG_FILE").unwrap_or(defaults.debug_log_file),
        cache_path: lookup("CACHE_PATH").unwrap_or(defaults.cache_path),
        cache_ttl_hours: lookup("CACHE_TTL_HOURS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.cache_ttl_hours),
    };

    CONFIG.set(config).ok();
}

pub fn get() -> AppConfig {
    CONFIG.get().cloned().unwrap_or_default()
}

/// Map a LOG_LEVEL value onto a tracing filter. The original logger had a
/// DATA level below debug (mapped to trace) and a NONE level (mapped to off).
pub fn tracing_filter(level: &str) -> EnvFilter {
    let directive = match level {
        "debug" => "debug",
        "info" => "info",
        "warn" | "warning" => "warn",
        "error" => "error",
        "data" => "trace",
        "none" => "off",
        other => {
            eprintln!("unknown log level {:?}, falling back to info", other);
            "info"
        }
    };
    EnvFilter::new(directive)
}

/// Parse a `.env` file into a map. Returns None when the file is absent or
/// unreadable. Lines are KEY=VALUE; `#` comments and blank lines are
/// skipped; surrounding single or double quotes on the value are stripped.
fn parse_dotenv(path: &Path) -> Option<HashMap<String, String>> {
    let content = std::fs::read_to_string(path).ok()?;
    let mut vars = HashMap::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let mut value = value.trim();
        if value.len() >= 2
            && ((value.starts_with('"') && value.ends_with('"'))
                || (value.starts_with('\'') && value.ends_with('\'')))
        {
            value = &value[1..value.len() - 1];
        }
        vars.insert(key.to_string(), value.to_string());
    }

    Some(vars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.cache_path, "image_cache.db");
        assert_eq!(config.cache_ttl_hours, 24);
        assert!(!config.debug);
    }

    #[test]
    fn test_parse_dotenv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "# comment").unwrap();
        writeln!(file, "PORT=9090").unwrap();
        writeln!(file, "TARGET_API_URL=\"https://example.com/v4\"").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "not a pair").unwrap();

        let vars = parse_dotenv(&path).unwrap();
        assert_eq!(vars.get("PORT").map(String::as_str), Some("9090"));
        assert_eq!(
            vars.get("TARGET_API_URL").map(String::as_str),
            Some("https://example.com/v4")
        );
        assert_eq!(vars.len(), 2);
    }

    #[test]
    fn test_parse_dotenv_missing_file() {
        assert!(parse_dotenv(Path::new("/nonexistent/.env")).is_none());
    }
}
