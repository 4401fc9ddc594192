use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("{0}")]
    Message(String),
    #[error("{0}")]
    Job(JobError),
    #[error("{0}")]
    Config(ConfigError),
    #[error("{0}")]
    Manifest(ManifestError),
    #[error("{0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("parse config: {0}")]
    Parse(String),
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("profile does not exist: {0}")]
    NoSuchProfile(String),
    #[error("destination not writable: {0}")]
    DestinationUnwritable(String),
    #[error("insufficient space: {available} bytes available, {required} bytes required")]
    InsufficientSpace { available: u64, required: u64 },
    #[error("copy failed: {0}")]
    CopyFailed(String),
    #[error("permission apply failed: {0}")]
    PermissionApplyFailed(String),
    #[error("manifest write failed: {0}")]
    ManifestWriteFailed(String),
    #[error("unknown destination user {0}")]
    UnknownDestinationUser(String),
    #[error("conflict unresolvable: {0}")]
    ConflictUnresolvable(String),
    #[error("cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest not found at {0}")]
    Missing(String),
    #[error("parse manifest: {0}")]
    Parse(String),
    #[error("unsupported manifest version {0}")]
    UnsupportedVersion(String),
}

pub type Result<T> = std::result::Result<T, VaultError>;

impl VaultError {
    pub fn message(msg: impl Into<String>) -> Self {
        VaultError::Message(msg.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, VaultError::Job(JobError::Cancelled))
    }
}

impl From<JobError> for VaultError {
    fn from(err: JobError) -> Self {
        VaultError::Job(err)
    }
}

impl From<ConfigError> for VaultError {
    fn from(err: ConfigError) -> Self {
        VaultError::Config(err)
    }
}

impl From<ManifestError> for VaultError {
    fn from(err: ManifestError) -> Self {
        VaultError::Manifest(err)
    }
}
