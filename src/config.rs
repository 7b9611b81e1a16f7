//! Server configuration: TOML file + CLI flag merge, with built-in
//! defaults matching spec.md §6.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

use crate::user_store::CredentialRecord;

fn default_listen() -> String {
    "0.0.0.0:1080".to_string()
}

fn default_dial_timeout_secs() -> u64 {
    10
}

/// A single configured user, as it would appear in a TOML config file.
/// `password` may be given as plaintext (hashed once at load) or as a
/// pre-hashed MD5 hex digest under `password_hash`.
#[derive(Debug, Deserialize)]
pub struct UserConfig {
    pub username: String,
    pub password: Option<String>,
    pub password_hash: Option<String>,
    pub max_concurrent: u32,
}

impl UserConfig {
    fn into_record(self) -> anyhow::Result<CredentialRecord> {
        match (self.password, self.password_hash) {
            (_, Some(hash)) => Ok(CredentialRecord::new(self.username, hash, self.max_concurrent)),
            (Some(plain), None) => {
                Ok(CredentialRecord::from_plaintext(&self.username, &plain, self.max_concurrent))
            }
            (None, None) => {
                anyhow::bail!("user {:?} has neither password nor password_hash configured", self.username)
            }
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    listen: Option<String>,
    dial_timeout_secs: Option<u64>,
    rate_limit_bps: Option<u64>,
    burst_bytes: Option<u64>,
    #[serde(default)]
    users: Vec<UserConfig>,
}

/// Authenticated SOCKS5 proxy with per-user concurrency quotas and optional
/// bandwidth rate limiting.
#[derive(Debug, Parser)]
#[command(name = "socks5d", version, about)]
pub struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Listen endpoint, overrides the config file.
    #[arg(long)]
    pub listen: Option<String>,

    /// Token-bucket refill rate in bytes/second; omit or 0 to disable shaping.
    #[arg(long)]
    pub rate_limit: Option<u64>,

    /// Token-bucket burst capacity in bytes.
    #[arg(long)]
    pub burst: Option<u64>,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

pub struct ServerConfig {
    pub listen_endpoint: SocketAddr,
    pub dial_timeout: Duration,
    pub rate_limit_bps: u64,
    pub burst_bytes: u64,
    pub users: Vec<CredentialRecord>,
}

impl ServerConfig {
    pub fn load(cli: &Cli) -> anyhow::Result<ServerConfig> {
        let file_config = match &cli.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)?;
                toml::from_str(&text)?
            }
            None => FileConfig::default(),
        };

        let listen = cli
            .listen
            .clone()
            .or(file_config.listen)
            .unwrap_or_else(default_listen);
        let listen_endpoint: SocketAddr = listen.parse()?;

        let dial_timeout = Duration::from_secs(
            file_config.dial_timeout_secs.unwrap_or_else(default_dial_timeout_secs),
        );

        let rate_limit_bps = cli.rate_limit.or(file_config.rate_limit_bps).unwrap_or(0);
        let burst_bytes = cli.burst.or(file_config.burst_bytes).unwrap_or(0);

        let users = file_config
            .users
            .into_iter()
            .map(UserConfig::into_record)
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(ServerConfig {
            listen_endpoint,
            dial_timeout,
            rate_limit_bps,
            burst_bytes,
            users,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn cli(args: &[&str]) -> Cli {
        let mut full = vec!["socks5d"];
        full.extend_from_slice(args);
        Cli::parse_from(full)
    }

    #[test]
    fn defaults_apply_with_no_config_or_flags() {
        let config = ServerConfig::load(&cli(&[])).unwrap();
        assert_eq!(config.listen_endpoint, "0.0.0.0:1080".parse().unwrap());
        assert_eq!(config.dial_timeout, Duration::from_secs(10));
        assert_eq!(config.rate_limit_bps, 0);
        assert!(config.users.is_empty());
    }

    #[test]
    fn cli_flags_override_file_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "listen = \"127.0.0.1:9000\"\nrate_limit_bps = 100").unwrap();
        let args = cli(&[
            "--config",
            file.path().to_str().unwrap(),
            "--listen",
            "127.0.0.1:1080",
        ]);
        let config = ServerConfig::load(&args).unwrap();
        assert_eq!(config.listen_endpoint, "127.0.0.1:1080".parse().unwrap());
        assert_eq!(config.rate_limit_bps, 100, "file value used when no CLI override given");
    }

    #[test]
    fn file_users_are_hashed_or_accepted_pre_hashed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [[users]]
            username = "alice"
            password = "hunter2"
            max_concurrent = 3

            [[users]]
            username = "bob"
            password_hash = "{}"
            max_concurrent = 1
            "#,
            crate::user_store::hash_password(b"swordfish")
        )
        .unwrap();
        let args = cli(&["--config", file.path().to_str().unwrap()]);
        let config = ServerConfig::load(&args).unwrap();
        assert_eq!(config.users.len(), 2);
        assert!(config.users[0].verify(b"hunter2"));
        assert!(config.users[1].verify(b"swordfish"));
    }

    #[test]
    fn user_without_password_or_hash_is_a_load_error_not_a_panic() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [[users]]
            username = "alice"
            max_concurrent = 3
            "#,
        )
        .unwrap();
        let args = cli(&["--config", file.path().to_str().unwrap()]);
        let err = ServerConfig::load(&args).unwrap_err();
        assert!(err.to_string().contains("alice"));
    }
}
