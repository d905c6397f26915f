use clap::Parser;
use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::types::RegistryCredential;

/// Server address Docker Hub credentials must be sent to.
const DOCKER_HUB_AUTH: &str = "https://index.docker.io/v1/";

/// Keys also read from unprefixed environment variables (`REGISTRY_URL`, ...).
const LEGACY_KEYS: &[&str] = &[
    "registry_url",
    "registry_username",
    "registry_password",
    "registry_tag",
    "notification_url",
];

/// Free-form text keys. Their environment values are taken verbatim, so a
/// password of `007` or a tag of `2` is not parsed as a number.
const TEXT_KEYS: &[&str] = &[
    "registry_url",
    "registry_username",
    "registry_password",
    "registry_tag",
    "notification_url",
    "enable_label",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    Quiet,
    #[default]
    Normal,
    Verbose,
}

/// Command-line flags; each one overrides every other configuration source.
#[derive(Debug, Default, Parser, Serialize)]
#[command(name = "puller", version, about = "Keeps containers on the newest registry image")]
pub struct Cli {
    /// Configuration file.
    #[arg(long, value_name = "PATH", default_value = "puller.toml")]
    #[serde(skip)]
    pub config: PathBuf,

    /// Check interval in seconds.
    #[arg(long, value_name = "SECS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,

    /// Remove unreferenced images after an update.
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub cleanup: bool,

    /// Only update containers carrying the enable label.
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub label_enable: bool,

    /// Enable verbose logging.
    #[arg(long, conflicts_with = "quiet")]
    #[serde(skip)]
    pub verbose: bool,

    /// Only log errors and updates.
    #[arg(long)]
    #[serde(skip)]
    pub quiet: bool,
}

impl Cli {
    fn verbosity(&self) -> Option<Verbosity> {
        match (self.verbose, self.quiet) {
            (true, _) => Some(Verbosity::Verbose),
            (_, true) => Some(Verbosity::Quiet),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Seconds between the start of two checks.
    pub interval: u64,
    pub cleanup: bool,
    pub label_enable: bool,
    pub verbosity: Verbosity,
    /// Label a container must carry (truthy) when `label_enable` is set.
    pub enable_label: String,
    /// Grace period before a stopped container is killed.
    pub stop_timeout: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry_username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry_password: Option<String>,
    /// Secondary candidate tag probed after the primary tag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry_tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval: 30,
            cleanup: false,
            label_enable: false,
            verbosity: Verbosity::Normal,
            enable_label: "puller.update.enable".into(),
            stop_timeout: 10,
            registry_url: None,
            registry_username: None,
            registry_password: None,
            registry_tag: None,
            notification_url: None,
        }
    }
}

impl Config {
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let mut config: Config = Self::figment(cli)
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

        if let Some(verbosity) = cli.verbosity() {
            config.verbosity = verbosity;
        }

        // Support Docker-style secrets
        if let Ok(secret_file) = std::env::var("REGISTRY_PASSWORD_FILE") {
            config.registry_password =
                Some(std::fs::read_to_string(secret_file)?.trim().to_string());
        }

        for value in [
            &mut config.registry_url,
            &mut config.registry_username,
            &mut config.registry_password,
            &mut config.registry_tag,
            &mut config.notification_url,
        ] {
            if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
                *value = None;
            }
        }

        if config.interval == 0 {
            anyhow::bail!("Invalid interval: must be at least one second");
        }

        Ok(config)
    }

    fn figment(cli: &Cli) -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(&cli.config))
            .merge(Json::file("puller.json"))
            .merge(verbatim_env("", LEGACY_KEYS))
            .merge(Env::prefixed("PULLER_").ignore(TEXT_KEYS))
            .merge(verbatim_env("PULLER_", TEXT_KEYS))
            .merge(Serialized::defaults(cli))
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout)
    }

    /// Credential for pulls; anonymous unless both username and password are set.
    pub fn credential(&self) -> Option<RegistryCredential> {
        let username = self.registry_username.as_deref()?;
        let password = self.registry_password.as_deref()?;
        let server_address = match self.registry_url.as_deref() {
            None | Some("docker.io") | Some("https://docker.io") => DOCKER_HUB_AUTH.to_string(),
            Some(url) => url.to_string(),
        };
        Some(RegistryCredential {
            username: username.to_string(),
            password: password.to_string(),
            server_address,
        })
    }
}

/// `{prefix}{KEY}` variables for `keys`, as untyped strings.
fn verbatim_env(prefix: &str, keys: &[&str]) -> Serialized<BTreeMap<String, String>> {
    let values = keys
        .iter()
        .filter_map(|key| {
            let value = std::env::var(format!("{prefix}{}", key.to_uppercase())).ok()?;
            Some((key.to_string(), value))
        })
        .collect();
    Serialized::defaults(values)
}
