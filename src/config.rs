use std::env;
use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} is not a socket address: {value}")]
    BadAddress { name: &'static str, value: String },
    #[error("{name} is not a number: {value}")]
    BadNumber { name: &'static str, value: String },
    #[error("{name} must be within {min}..={max}, got {value}")]
    OutOfRange {
        name: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },
}

const DAY_SECS: u64 = 24 * 60 * 60;
const SESSION_TTL_RANGE: RangeInclusive<u64> = 60..=365 * DAY_SECS;
const CHALLENGE_TTL_RANGE: RangeInclusive<u64> = 10..=DAY_SECS;
const UPLOAD_BYTES_RANGE: RangeInclusive<u64> = 1..=1024 * 1024 * 1024;
const SET_HISTORY_RANGE: RangeInclusive<u64> = 1..=1000;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: SocketAddr,
    pub db_path: PathBuf,
    /// `None` keeps uploads in memory.
    pub media_root: Option<PathBuf>,
    pub public_media_url: String,
    pub rp_id: String,
    pub rp_name: String,
    pub admin_token: Option<String>,
    /// Usernames promoted to admin at startup and on registration.
    pub admin_users: Vec<String>,
    pub session_ttl_secs: u64,
    pub challenge_ttl_secs: u64,
    pub max_upload_bytes: usize,
    pub cors_origin: String,
    pub question_set_history: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8787)),
            db_path: PathBuf::from("data/questa.sqlite"),
            media_root: Some(PathBuf::from("data/media")),
            public_media_url: "/api/media".to_string(),
            rp_id: "localhost".to_string(),
            rp_name: "Learning Notebook".to_string(),
            admin_token: None,
            admin_users: Vec::new(),
            session_ttl_secs: 7 * 24 * 60 * 60,
            challenge_ttl_secs: 5 * 60,
            max_upload_bytes: 100 * 1024 * 1024,
            cors_origin: "*".to_string(),
            question_set_history: 10,
        }
    }
}

/// Reads a positive integer setting, keeping `default` when it is unset.
fn number(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: u64,
    range: RangeInclusive<u64>,
) -> Result<u64, ConfigError> {
    let Some(raw) = lookup(name).filter(|v| !v.is_empty()) else {
        return Ok(default);
    };
    let value = raw
        .parse::<u64>()
        .map_err(|_| ConfigError::BadNumber { name, value: raw })?;
    if !range.contains(&value) {
        return Err(ConfigError::OutOfRange {
            name,
            value,
            min: *range.start(),
            max: *range.end(),
        });
    }
    Ok(value)
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

impl Config {
    /// Reads `QUESTA_*` variables. Unset values keep their defaults;
    /// malformed or out-of-range values are errors.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok().map(|v| v.trim().to_string()))
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let text = |name: &str| lookup(name).filter(|v| !v.is_empty());
        let bind = match text("QUESTA_BIND") {
            Some(value) => value
                .parse()
                .map_err(|_| ConfigError::BadAddress {
                    name: "QUESTA_BIND",
                    value,
                })?,
            None => defaults.bind,
        };
        let media_root = match lookup("QUESTA_MEDIA_ROOT") {
            Some(v) if v.is_empty() => None,
            Some(v) => Some(PathBuf::from(v)),
            None => defaults.media_root,
        };
        let max_upload_bytes = number(
            &lookup,
            "QUESTA_MAX_UPLOAD_BYTES",
            defaults.max_upload_bytes as u64,
            UPLOAD_BYTES_RANGE,
        )?;
        let question_set_history = number(
            &lookup,
            "QUESTA_QUESTION_SET_HISTORY",
            defaults.question_set_history as u64,
            SET_HISTORY_RANGE,
        )?;
        Ok(Self {
            bind,
            db_path: text("QUESTA_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            media_root,
            public_media_url: text("QUESTA_PUBLIC_MEDIA_URL").unwrap_or(defaults.public_media_url),
            rp_id: text("QUESTA_RP_ID").unwrap_or(defaults.rp_id),
            rp_name: text("QUESTA_RP_NAME").unwrap_or(defaults.rp_name),
            admin_token: text("QUESTA_ADMIN_TOKEN"),
            admin_users: lookup("QUESTA_ADMIN_USERS")
                .map(|v| split_list(&v))
                .unwrap_or_default(),
            session_ttl_secs: number(
                &lookup,
                "QUESTA_SESSION_TTL_SECS",
                defaults.session_ttl_secs,
                SESSION_TTL_RANGE,
            )?,
            challenge_ttl_secs: number(
                &lookup,
                "QUESTA_CHALLENGE_TTL_SECS",
                defaults.challenge_ttl_secs,
                CHALLENGE_TTL_RANGE,
            )?,
            max_upload_bytes: max_upload_bytes as usize,
            cors_origin: text("QUESTA_CORS_ORIGIN").unwrap_or(defaults.cors_origin),
            question_set_history: question_set_history as usize,
        })
    }

    pub fn is_admin_user(&self, username: &str) -> bool {
        self.admin_users.iter().any(|u| u == username)
    }

    /// Everything in memory, for tests and throwaway servers.
    pub fn ephemeral() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 0)),
            db_path: PathBuf::from(":memory:"),
            media_root: None,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.bind.port(), 8787);
        assert_eq!(config.session_ttl_secs, 604_800);
        assert_eq!(config.challenge_ttl_secs, 300);
        assert_eq!(config.max_upload_bytes, 104_857_600);
        assert_eq!(config.question_set_history, 10);
        assert!(config.admin_token.is_none());
    }

    #[test]
    fn admin_user_lists_are_trimmed() {
        let config = Config {
            admin_users: split_list(" boss_01, ,teacher "),
            ..Config::default()
        };
        assert_eq!(config.admin_users, vec!["boss_01", "teacher"]);
        assert!(config.is_admin_user("teacher"));
        assert!(!config.is_admin_user("learner"));
    }

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn unset_variables_keep_defaults() {
        let config = Config::from_lookup(lookup(&[("QUESTA_SESSION_TTL_SECS", "")])).unwrap();
        assert_eq!(config.session_ttl_secs, 604_800);
        assert_eq!(config.bind.port(), 8787);
    }

    #[test]
    fn numbers_are_parsed_and_bounded() {
        let config = Config::from_lookup(lookup(&[
            ("QUESTA_SESSION_TTL_SECS", "3600"),
            ("QUESTA_QUESTION_SET_HISTORY", "3"),
            ("QUESTA_MEDIA_ROOT", ""),
        ]))
        .unwrap();
        assert_eq!(config.session_ttl_secs, 3600);
        assert_eq!(config.question_set_history, 3);
        assert!(config.media_root.is_none());

        let err = Config::from_lookup(lookup(&[("QUESTA_MAX_UPLOAD_BYTES", "10MB")])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::BadNumber {
                name: "QUESTA_MAX_UPLOAD_BYTES",
                ..
            }
        ));
        let err = Config::from_lookup(lookup(&[(
            "QUESTA_SESSION_TTL_SECS",
            "9223372036854775807",
        )]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::OutOfRange {
                name: "QUESTA_SESSION_TTL_SECS",
                ..
            }
        ));
        assert!(Config::from_lookup(lookup(&[("QUESTA_QUESTION_SET_HISTORY", "0")])).is_err());
        assert!(Config::from_lookup(lookup(&[("QUESTA_BIND", "nowhere")])).is_err());
    }

    #[test]
    fn ephemeral_config_uses_memory_backends() {
        let config = Config::ephemeral();
        assert_eq!(config.db_path, PathBuf::from(":memory:"));
        assert!(config.media_root.is_none());
        assert_eq!(config.bind.port(), 0);
    }
}
