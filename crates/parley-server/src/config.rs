use std::path::PathBuf;

use anyhow::{Context, Result, bail};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

/// Ten years; keeps expiry arithmetic well inside chrono's range.
const MAX_TOKEN_TTL_DAYS: i64 = 3650;

/// Server settings, read from `PARLEY_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub token_ttl_days: i64,
    pub media_root: PathBuf,
    pub media_url: String,
    pub max_upload_bytes: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let jwt_secret = lookup("PARLEY_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("PARLEY_JWT_SECRET is unset or still a placeholder; set it in your .env file");
        }

        let port: u16 = get("PARLEY_PORT", "3000")
            .parse()
            .context("PARLEY_PORT must be a port number")?;
        let token_ttl_days: i64 = get("PARLEY_TOKEN_TTL_DAYS", "30")
            .parse()
            .context("PARLEY_TOKEN_TTL_DAYS must be a whole number of days")?;
        if token_ttl_days <= 0 {
            bail!("PARLEY_TOKEN_TTL_DAYS must be positive");
        }
        if token_ttl_days > MAX_TOKEN_TTL_DAYS {
            bail!("PARLEY_TOKEN_TTL_DAYS must be at most {MAX_TOKEN_TTL_DAYS}");
        }
        let max_upload_bytes: usize = get("PARLEY_MAX_UPLOAD_BYTES", "52428800") // 50 MB
            .parse()
            .context("PARLEY_MAX_UPLOAD_BYTES must be a byte count")?;

        let media_url = normalize_media_url(&get("PARLEY_MEDIA_URL", "/media/"))?;

        Ok(Self {
            host: get("PARLEY_HOST", "0.0.0.0"),
            port,
            db_path: get("PARLEY_DB_PATH", "parley.db").into(),
            jwt_secret,
            token_ttl_days,
            media_root: get("PARLEY_MEDIA_ROOT", "./media").into(),
            media_url,
            max_upload_bytes,
        })
    }
}

/// Force the media prefix into `/segment/.../` form. The root path is refused
/// since it would shadow the API routes.
fn normalize_media_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        bail!("PARLEY_MEDIA_URL must not be the root path");
    }
    Ok(format!("/{trimmed}/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_with_only_a_secret() {
        let cfg = config(&[("PARLEY_JWT_SECRET", "s3cret-value")]).unwrap();
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.db_path, PathBuf::from("parley.db"));
        assert_eq!(cfg.token_ttl_days, 30);
        assert_eq!(cfg.media_url, "/media/");
        assert_eq!(cfg.max_upload_bytes, 50 * 1024 * 1024);
    }

    #[test]
    fn missing_or_placeholder_secret_is_fatal() {
        assert!(config(&[]).is_err());
        assert!(config(&[("PARLEY_JWT_SECRET", "dev-secret-change-me")]).is_err());
    }

    #[test]
    fn bad_numbers_are_reported() {
        assert!(config(&[("PARLEY_JWT_SECRET", "x"), ("PARLEY_PORT", "http")]).is_err());
        assert!(config(&[("PARLEY_JWT_SECRET", "x"), ("PARLEY_TOKEN_TTL_DAYS", "0")]).is_err());
    }

    #[test]
    fn token_ttl_has_an_upper_bound() {
        let cfg = config(&[("PARLEY_JWT_SECRET", "x"), ("PARLEY_TOKEN_TTL_DAYS", "3650")]).unwrap();
        assert_eq!(cfg.token_ttl_days, 3650);
        assert!(config(&[("PARLEY_JWT_SECRET", "x"), ("PARLEY_TOKEN_TTL_DAYS", "3651")]).is_err());
        assert!(config(&[("PARLEY_JWT_SECRET", "x"), ("PARLEY_TOKEN_TTL_DAYS", "9223372036854775807")]).is_err());
    }

    #[test]
    fn media_url_is_normalized() {
        let cfg = config(&[("PARLEY_JWT_SECRET", "x"), ("PARLEY_MEDIA_URL", "files")]).unwrap();
        assert_eq!(cfg.media_url, "/files/");
        assert!(config(&[("PARLEY_JWT_SECRET", "x"), ("PARLEY_MEDIA_URL", "/")]).is_err());
    }
}
