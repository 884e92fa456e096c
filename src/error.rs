use std::io;
use std::path::PathBuf;

/// An external command that could not be started or exited unsuccessfully.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("{command} failed to start: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("{command} failed ({status}):\n{stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },
}

/// Fatal decisions of the deployment target resolver.
///
/// Every variant carries the offending ref or event so the failure message
/// is enough to diagnose the trigger.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("unhandled branch '{ref_name}': only pushes to '{mainline}' are deployed")]
    UnhandledBranch { ref_name: String, mainline: String },

    #[error("unhandled ref type '{ref_type}' for ref '{ref_name}'")]
    UnhandledRefType { ref_type: String, ref_name: String },

    #[error("unhandled event '{event}'")]
    UnhandledEvent { event: String },

    #[error("malformed release tag '{tag}': expected MAJOR.MINOR.PATCH")]
    MalformedTag { tag: String },
}

/// Failures while decrypting a credential blob.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("environment variable {var} is not set")]
    MissingEnv { var: String },

    #[error("environment variable {var} is not valid hex")]
    InvalidHex { var: String },

    #[error("{var} must decode to {expected} bytes, got {actual}")]
    InvalidLength {
        var: String,
        expected: usize,
        actual: usize,
    },

    #[error("failed to decrypt {path:?}: wrong key/IV or corrupted blob")]
    Decrypt { path: PathBuf },

    #[error("failed to encrypt {path:?}")]
    Encrypt { path: PathBuf },

    #[error("secret file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Failure of one publishing branch (site or translations).
///
/// Fatal to that branch only; the other branch keeps whatever it did.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("sync to '{remote}' failed: {source}")]
    Sync {
        remote: String,
        #[source]
        source: CommandError,
    },

    #[error("mirror to '{remote}' failed: {source}")]
    Mirror {
        remote: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid exclude pattern: {0}")]
    Exclude(String),

    #[error("Git operation failed: {operation}\n{source}")]
    Git {
        operation: String,
        #[source]
        source: CommandError,
    },

    #[error("artifact '{name}' not found at {path:?}")]
    MissingArtifact { name: String, path: PathBuf },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Secret(#[from] SecretError),
}

/// Custom error type for docs_deploy operations
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error("Build failed: {0}")]
    BuildFailure(String),

    #[error("Deployment failed: {0}")]
    DeploymentFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Trigger event error: {0}")]
    EventError(String),

    #[error("Source checkout failed: {0}")]
    Checkout(#[source] CommandError),

    #[error("Tag history unavailable: {0}")]
    TagHistory(#[source] CommandError),

    #[error(transparent)]
    Secret(#[from] SecretError),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParseError(#[from] toml::de::Error),
}

/// Helper type for Results that use DeployError
pub type Result<T> = std::result::Result<T, DeployError>;
