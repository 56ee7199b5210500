//! Export configuration and command-line arguments.
//!
//! Configuration is stored as TOML at `~/.config/ansel-export/config.toml`
//! unless another path is given with `--config`.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use serde::{Deserialize, Serialize};

use ansel_export_client::{ImageEncoding, SessionConfig};

/// Environment variable that overrides the configured password.
pub const PASSWORD_ENV: &str = "ANSEL_EXPORT_PASSWORD";

/// Full CLI configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub session: SessionConfig,

    #[serde(default)]
    pub target: Target,
}

/// Where the images go.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Gallery id. Takes precedence over `gallery_name`.
    #[serde(default)]
    pub gallery_id: Option<i64>,

    #[serde(default)]
    pub gallery_name: Option<String>,

    /// Create the named gallery when it does not exist.
    #[serde(default)]
    pub create_missing: bool,

    /// Description for a created gallery.
    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub encoding: ImageEncoding,

    /// Make the first uploaded image the gallery's key image.
    #[serde(default)]
    pub set_first_as_key: bool,
}

impl Config {
    /// Loads configuration from `path`, or from the default location.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => config_path()?,
        };
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let mut config: Config =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        config.override_password(std::env::var(PASSWORD_ENV).ok());

        tracing::debug!(path = %path.display(), "configuration read");
        Ok(config)
    }

    /// Replaces the configured password with a non-empty override.
    pub fn override_password(&mut self, password: Option<String>) {
        if let Some(password) = password.filter(|p| !p.is_empty()) {
            self.session.credentials.password = password;
        }
    }
}

/// Returns the default configuration file path.
fn config_path() -> anyhow::Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME is not set")?;
    Ok(PathBuf::from(home)
        .join(".config")
        .join("ansel-export")
        .join("config.toml"))
}

/// Command line.
#[derive(Debug, Parser, PartialEq, Eq)]
#[command(name = "ansel-export")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Upload images to an Ansel photo gallery")]
pub struct Args {
    /// Configuration file [default: ~/.config/ansel-export/config.toml]
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Images to upload, in order
    #[arg(required = true, value_name = "IMAGE")]
    pub files: Vec<PathBuf>,
}

/// MIME type for an image path, from its extension.
pub fn content_type_for(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .to_string()
}
