use std::path::PathBuf;
use std::time::Duration;

use nostr_sdk::{Keys, PublicKey};
use thiserror::Error;
use tokio::process::Command;
use tracing::warn;

/// How long a profile request may wait for an answer before giving up.
pub const DEFAULT_ANSWER_TIMEOUT_MS: u64 = 1000;
/// Display timeout handed to the notification sink.
pub const DEFAULT_NOTIFY_TIMEOUT_MS: u64 = 10_000;

/// Runtime configuration, resolved once at startup and immutable after.
#[derive(Debug, Clone)]
pub struct Config {
    pub relays: Vec<String>,
    /// The identity whose notifications we watch.
    pub pubkey: PublicKey,
    /// Signing/decryption keys, when a secret key is configured.
    pub keys: Option<Keys>,
    pub answer_timeout: Duration,
    pub notify_timeout_ms: u64,
    pub avatar_dir: PathBuf,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no relays configured; set NOSTR_RELAYS or `git config nostr.relays`")]
    MissingRelays,
    #[error("no pubkey given; pass one as an argument, set NOSTR_KEY, or configure a secret key")]
    MissingIdentity,
    #[error("invalid secret key: {0}")]
    InvalidSecretKey(String),
    #[error("invalid pubkey {0}: {1}")]
    InvalidPubkey(String, String),
}

impl Config {
    /// Discover configuration from the environment. Relays and the secret
    /// key fall back to git config when the env vars are unset.
    pub async fn discover(
        pubkey_arg: Option<&str>,
        relay_override: &[String],
    ) -> Result<Self, ConfigError> {
        let relays = if relay_override.is_empty() {
            discover_relays().await?
        } else {
            relay_override.to_vec()
        };

        let keys = discover_keys().await?;
        let pubkey = discover_pubkey(keys.as_ref(), pubkey_arg)?;

        Ok(Self {
            relays,
            pubkey,
            keys,
            answer_timeout: Duration::from_millis(env_ms(
                "NOSTR_PROFILE_TIMEOUT_MS",
                DEFAULT_ANSWER_TIMEOUT_MS,
            )),
            notify_timeout_ms: env_ms("NOTIFY_TIMEOUT", DEFAULT_NOTIFY_TIMEOUT_MS),
            avatar_dir: default_avatar_dir(),
        })
    }
}

async fn discover_relays() -> Result<Vec<String>, ConfigError> {
    let raw = match std::env::var("NOSTR_RELAYS") {
        Ok(value) => value,
        Err(_) => git_config("nostr.relays")
            .await
            .ok_or(ConfigError::MissingRelays)?,
    };
    let relays = split_relays(&raw);
    if relays.is_empty() {
        return Err(ConfigError::MissingRelays);
    }
    Ok(relays)
}

pub(crate) fn split_relays(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

async fn discover_keys() -> Result<Option<Keys>, ConfigError> {
    let secret = match std::env::var("NOSTR_SECRET_KEY") {
        Ok(value) => Some(value),
        Err(_) => git_config("nostr.secretkey").await,
    };
    match secret {
        Some(secret) => Keys::parse(&secret)
            .map(Some)
            .map_err(|err| ConfigError::InvalidSecretKey(err.to_string())),
        None => Ok(None),
    }
}

/// Operator pubkey: derived from the secret key when one is configured,
/// else the CLI argument, else `NOSTR_KEY`.
fn discover_pubkey(keys: Option<&Keys>, arg: Option<&str>) -> Result<PublicKey, ConfigError> {
    if let Some(keys) = keys {
        return Ok(keys.public_key());
    }
    let raw = arg
        .map(str::to_string)
        .or_else(|| std::env::var("NOSTR_KEY").ok())
        .ok_or(ConfigError::MissingIdentity)?;
    PublicKey::parse(&raw).map_err(|err| ConfigError::InvalidPubkey(raw, err.to_string()))
}

fn env_ms(var: &str, default: u64) -> u64 {
    match std::env::var(var) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(var, value = %raw, "ignoring unparseable timeout");
            default
        }),
        Err(_) => default,
    }
}

fn default_avatar_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("nostr-notifyd")
        .join("avatars")
}

async fn git_config(key: &str) -> Option<String> {
    let output = Command::new("git").args(["config", key]).output().await.ok()?;
    if !output.status.success() {
        return None;
    }
    let value = String::from_utf8(output.stdout).ok()?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}
