//! Configuration and logging setup shared by the strata binaries.
//!
//! Every field carries a serde default, so an empty TOML file (or no file at all) yields a usable
//! [`StrataConfig`].

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Once, OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Modes validated when neither the config nor the command line names any.
pub const DEFAULT_MODES: [&str; 4] = ["code", "prose", "extracted-prose", "records"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrataConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub validate: ValidateConfig,
    #[serde(default)]
    pub postings: PostingsConfig,
    #[serde(default)]
    pub sqlite: SqliteConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// A bare level (`debug`, `warning`, ...) for the `strata.*` targets, or a full `EnvFilter`
    /// directive string.
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    /// Emit logs as JSON lines.
    #[serde(default)]
    pub json: bool,
}

impl LoggingConfig {
    fn default_level() -> String {
        "warn".to_owned()
    }

    /// Filter directives for `level`. Other crates stay at `warn` unless spelled out.
    pub(crate) fn directives(&self) -> String {
        let level = self.level.trim();
        let bare = match level.to_ascii_lowercase().as_str() {
            "" | "warn" | "warning" => "warn",
            "trace" => "trace",
            "debug" => "debug",
            "info" => "info",
            "error" => "error",
            "off" => "off",
            _ => return level.to_owned(),
        };
        format!("warn,strata={bare}")
    }

    /// Configured directives with `RUST_LOG` layered on top.
    pub fn env_filter(&self) -> EnvFilter {
        let mut directives = self.directives();
        if let Some(extra) = std::env::var("RUST_LOG")
            .ok()
            .filter(|value| !value.trim().is_empty())
        {
            directives.push(',');
            directives.push_str(extra.trim());
        }
        EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new("warn"))
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidateConfig {
    /// Treat manifest and schema gaps as hard failures.
    #[serde(default = "default_true")]
    pub strict: bool,

    /// Modes to validate. Empty means [`DEFAULT_MODES`].
    #[serde(default)]
    pub modes: Vec<String>,

    /// Directory holding `index-<mode>` directories. Defaults to the repo root.
    #[serde(default)]
    pub index_root: Option<PathBuf>,

    #[serde(default = "ValidateConfig::default_max_json_bytes")]
    pub max_json_bytes: u64,

    /// Rows sampled for the metaV2 recompute check.
    #[serde(default = "ValidateConfig::default_sample_meta_v2")]
    pub sample_meta_v2: usize,

    #[serde(default = "ValidateConfig::default_manifest_retry_attempts")]
    pub manifest_retry_attempts: u32,

    #[serde(default = "ValidateConfig::default_manifest_retry_base_ms")]
    pub manifest_retry_base_ms: u64,
}

impl ValidateConfig {
    fn default_max_json_bytes() -> u64 {
        128 * 1024 * 1024
    }

    fn default_sample_meta_v2() -> usize {
        25
    }

    fn default_manifest_retry_attempts() -> u32 {
        3
    }

    fn default_manifest_retry_base_ms() -> u64 {
        25
    }

    /// Configured modes, or the defaults when none are configured.
    pub fn effective_modes(&self) -> Vec<String> {
        if self.modes.is_empty() {
            DEFAULT_MODES.iter().map(|mode| (*mode).to_string()).collect()
        } else {
            self.modes.clone()
        }
    }
}

impl Default for ValidateConfig {
    fn default() -> Self {
        Self {
            strict: true,
            modes: Vec::new(),
            index_root: None,
            max_json_bytes: Self::default_max_json_bytes(),
            sample_meta_v2: Self::default_sample_meta_v2(),
            manifest_retry_attempts: Self::default_manifest_retry_attempts(),
            manifest_retry_base_ms: Self::default_manifest_retry_base_ms(),
        }
    }
}

/// Which optional postings the build is expected to have produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingsConfig {
    #[serde(default = "default_true")]
    pub phrase_ngrams: bool,
    #[serde(default = "default_true")]
    pub chargrams: bool,
    /// Require `field_postings` and `field_tokens` for non-empty indexes.
    #[serde(default = "default_true")]
    pub fielded: bool,
}

impl Default for PostingsConfig {
    fn default() -> Self {
        Self {
            phrase_ngrams: true,
            chargrams: true,
            fielded: true,
        }
    }
}

/// Which retrieval schema the sqlite mirror was built for. Decides the required tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreMode {
    #[default]
    Bm25,
    Fts,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqliteConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub score_mode: ScoreMode,
    #[serde(default)]
    pub code_path: Option<PathBuf>,
    #[serde(default)]
    pub prose_path: Option<PathBuf>,
}

impl SqliteConfig {
    /// Database path for `mode`, or `None` for modes without a sqlite mirror.
    pub fn db_path(&self, index_root: &Path, mode: &str) -> Option<PathBuf> {
        let configured = match mode {
            "code" => self.code_path.as_ref(),
            "prose" => self.prose_path.as_ref(),
            _ => return None,
        };
        Some(match configured {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => index_root.join(path),
            None => index_root
                .join("index-sqlite")
                .join(format!("index-{mode}.db")),
        })
    }
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            score_mode: ScoreMode::default(),
            code_path: None,
            prose_path: None,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse toml config{}: {message}", at_line(.line))]
    Toml { line: Option<usize>, message: String },
}

fn at_line(line: &Option<usize>) -> String {
    line.map(|line| format!(" at line {line}")).unwrap_or_default()
}

impl ConfigError {
    /// The default `Display` of a toml error quotes the offending source line; keep only the
    /// line number and a redacted message.
    fn toml(err: &toml::de::Error, text: &str) -> Self {
        let line = err
            .span()
            .and_then(|span| text.get(..span.start))
            .map(|before| before.matches('\n').count() + 1);
        ConfigError::Toml {
            line,
            message: redact_toml_values(err.message()),
        }
    }
}

/// Strip user values from a toml/serde message: quoted strings anywhere, and the backticked
/// scalar that follows `invalid type:` or `invalid value:`.
fn redact_toml_values(message: &str) -> String {
    static VALUE_RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = VALUE_RE.get_or_init(|| {
        Regex::new(r#""(?:\\.|[^"\\])*"|^(invalid (?:type|value): [a-z ]*)`[^`]*`"#).ok()
    });
    match re {
        Some(re) => re
            .replace_all(message, |caps: &regex::Captures<'_>| match caps.get(1) {
                Some(prefix) => format!("{}`<redacted>`", prefix.as_str()),
                None => "\"<redacted>\"".to_owned(),
            })
            .into_owned(),
        None => message.to_owned(),
    }
}

impl StrataConfig {
    /// Load a config file from TOML.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::load_from_str(&text)
    }

    pub fn load_from_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|err| ConfigError::toml(&err, text))
    }
}

static TRACING_INIT: Once = Once::new();

/// Installs the global `tracing` subscriber writing to stderr.
///
/// Safe to call more than once; only the first call has an effect.
pub fn init_tracing(config: &LoggingConfig) {
    TRACING_INIT.call_once(|| {
        let fmt = tracing_subscriber::fmt::layer()
            .with_writer(io::stderr)
            .with_ansi(false);
        let layer: Box<dyn Layer<Registry> + Send + Sync> = if config.json {
            fmt.json().boxed()
        } else {
            fmt.boxed()
        };
        let subscriber = tracing_subscriber::registry()
            .with(layer)
            .with(config.env_filter());
        if tracing::subscriber::set_global_default(subscriber).is_err() {
            tracing::debug!(target: "strata.config", "global subscriber already installed");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_levels_apply_to_strata_targets() {
        let with_level = |level: &str| LoggingConfig {
            level: level.to_owned(),
            ..LoggingConfig::default()
        };
        assert_eq!(with_level(" WARNING ").directives(), "warn,strata=warn");
        assert_eq!(with_level("").directives(), "warn,strata=warn");
        assert_eq!(with_level("Debug").directives(), "warn,strata=debug");
        assert_eq!(
            with_level("strata.sqlite=trace").directives(),
            "strata.sqlite=trace"
        );
    }

    #[test]
    fn toml_errors_do_not_echo_values() {
        #[derive(Debug, serde::Deserialize)]
        struct Dummy {
            #[allow(dead_code)]
            flag: bool,
        }

        let raw = toml::from_str::<Dummy>("flag = \"hunter2\"").expect_err("type error");
        let message = redact_toml_values(raw.message());
        assert!(!message.contains("hunter2"), "{message}");

        let raw = toml::from_str::<Dummy>("flag = 4242").expect_err("type error");
        let message = redact_toml_values(raw.message());
        assert!(!message.contains("4242"), "{message}");
        assert!(message.contains("expected"), "{message}");
    }

    #[test]
    fn sqlite_paths_default_under_index_root() {
        let sqlite = SqliteConfig {
            prose_path: Some(PathBuf::from("custom/prose.db")),
            ..SqliteConfig::default()
        };
        let root = Path::new("/repo");
        assert_eq!(
            sqlite.db_path(root, "code"),
            Some(PathBuf::from("/repo/index-sqlite/index-code.db"))
        );
        assert_eq!(
            sqlite.db_path(root, "prose"),
            Some(PathBuf::from("/repo/custom/prose.db"))
        );
        assert_eq!(sqlite.db_path(root, "records"), None);
    }
}
