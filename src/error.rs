use std::{fmt, io};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(feature = "service")]
use notify::{Error as NotifyError, ErrorKind as NotifyErrorKind};

use serde_json::Error as JsonError;

use crate::bind_target::BindTarget;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum FieldsyncError {
    #[error("Invalid bind target loop: {}", format_chain(.0))]
    BindTargetLoop(Vec<BindTarget>),
    #[error("Compute function failed: {0}")]
    Compute(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Custom error: {0}")]
    Custom(String),
    #[error("Invalid bind target declaration: {0}")]
    InvalidDeclaration(String),
    #[error("File System error: {0}")]
    Io(String),
    #[error("Item Not Found: {0}")]
    NotFound(String),
    #[error("You do not have permission to access this resource")]
    PermissionDenied,
    #[error("(De)Serialization error: {0}")]
    Serialization(String),
    #[error("No metadata source registered with id '{0}'")]
    SourceNotFound(String),
    #[error("External sync failed: {0}")]
    Sync(String),
}

impl FieldsyncError {
    /// Errors a caller is expected to surface to the end user as an invalid field
    /// declaration, as opposed to internal misconfiguration.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            FieldsyncError::BindTargetLoop(_) | FieldsyncError::InvalidDeclaration(_)
        )
    }
}

fn format_chain(chain: &[BindTarget]) -> String {
    chain
        .iter()
        .map(|target| target.to_string())
        .collect::<Vec<String>>()
        .join(" -> ")
}

impl From<toml::de::Error> for FieldsyncError {
    fn from(src: toml::de::Error) -> FieldsyncError {
        FieldsyncError::Serialization(format!("Toml deserialization error: {src}"))
    }
}

impl From<toml::ser::Error> for FieldsyncError {
    fn from(src: toml::ser::Error) -> FieldsyncError {
        FieldsyncError::Serialization(format!("Toml serialization error: {src}"))
    }
}

impl From<JsonError> for FieldsyncError {
    fn from(src: JsonError) -> FieldsyncError {
        FieldsyncError::Serialization(format!("JSON (de)serialization error: {src}"))
    }
}

impl From<serde_yaml::Error> for FieldsyncError {
    fn from(src: serde_yaml::Error) -> FieldsyncError {
        FieldsyncError::Serialization(format!("YAML (de)serialization error: {src}"))
    }
}

impl From<io::Error> for FieldsyncError {
    fn from(x: io::Error) -> Self {
        match x.kind() {
            io::ErrorKind::NotFound => FieldsyncError::NotFound(format!("{x}")),
            io::ErrorKind::PermissionDenied => FieldsyncError::PermissionDenied,
            _ => FieldsyncError::Io(format!("IOError: {}", x.kind())),
        }
    }
}

impl From<fmt::Error> for FieldsyncError {
    fn from(x: fmt::Error) -> Self {
        FieldsyncError::Serialization(format!("{x}"))
    }
}

#[cfg(feature = "service")]
impl From<NotifyError> for FieldsyncError {
    fn from(notify_error: NotifyError) -> Self {
        match notify_error.kind {
            NotifyErrorKind::Generic(msg) => FieldsyncError::Custom(format!(
                "notify-debouncer: {}, paths: {:?}",
                msg, notify_error.paths
            )),
            NotifyErrorKind::Io(io_error) => FieldsyncError::Io(format!(
                "notify-debouncer: io error {}, paths: {:?}",
                io_error.kind(),
                notify_error.paths
            )),
            NotifyErrorKind::PathNotFound => FieldsyncError::NotFound(format!(
                "notify-debouncer: path(s) not found: {:?}",
                notify_error.paths
            )),
            NotifyErrorKind::WatchNotFound => FieldsyncError::NotFound(format!(
                "notify-debouncer: watch not found, paths: {:?}",
                notify_error.paths
            )),
            NotifyErrorKind::InvalidConfig(_) => {
                FieldsyncError::Config("notify-debouncer invalid config".to_string())
            }
            NotifyErrorKind::MaxFilesWatch => {
                FieldsyncError::Custom("notify-debouncer max file watch limit reached".to_string())
            }
        }
    }
}
