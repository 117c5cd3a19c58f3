use strata_artifacts::ArtifactError;
use strata_config::ConfigError;

pub type Result<T> = std::result::Result<T, ValidateError>;

/// Failures that stop a validation run before it can produce a report.
///
/// Problems with individual artifacts are report entries, not errors.
#[derive(Debug, thiserror::Error)]
pub enum ValidateError {
    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("index root not found: {}", .0.display())]
    RootMissing(std::path::PathBuf),
}
