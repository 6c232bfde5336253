use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FabricErrorKind {
    PoolTimeout,
    PoolClosed,
    ConnectionCreate,
    Session,
    RemoteExit,
    ConfigFieldMissing,
    InvalidConfig,
    UnsupportedSource,
    ProgramNotFound,
    Io,
}

#[derive(Debug, thiserror::Error)]
pub enum FabricError {
    #[error("timeout acquiring connection to {host} after {waited:?}")]
    PoolTimeout { host: String, waited: Duration },

    #[error("the pool for {host} is closed")]
    PoolClosed { host: String },

    #[error("unable to connect to {user}@{host}: {message}")]
    ConnectionCreate {
        host: String,
        user: String,
        message: String,
    },

    #[error("session error: {0}")]
    Session(String),

    #[error("remote command `{command}` failed: {message}")]
    RemoteExit { command: String, message: String },

    #[error("configuration field `{field}` missing{}", .program.as_ref().map(|p| format!(" for program {}", p)).unwrap_or_default())]
    ConfigFieldMissing {
        program: Option<String>,
        field: String,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("cannot execute local commands for source {source_locator}")]
    UnsupportedSource { source_locator: String },

    #[error("program name {0} not found")]
    ProgramNotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FabricError {
    pub fn kind(&self) -> FabricErrorKind {
        match self {
            FabricError::PoolTimeout { .. } => FabricErrorKind::PoolTimeout,
            FabricError::PoolClosed { .. } => FabricErrorKind::PoolClosed,
            FabricError::ConnectionCreate { .. } => FabricErrorKind::ConnectionCreate,
            FabricError::Session(_) => FabricErrorKind::Session,
            FabricError::RemoteExit { .. } => FabricErrorKind::RemoteExit,
            FabricError::ConfigFieldMissing { .. } => FabricErrorKind::ConfigFieldMissing,
            FabricError::InvalidConfig(_) => FabricErrorKind::InvalidConfig,
            FabricError::UnsupportedSource { .. } => FabricErrorKind::UnsupportedSource,
            FabricError::ProgramNotFound(_) => FabricErrorKind::ProgramNotFound,
            FabricError::Io(_) => FabricErrorKind::Io,
        }
    }

    pub fn missing(program: Option<&str>, field: impl Into<String>) -> Self {
        FabricError::ConfigFieldMissing {
            program: program.map(|p| p.to_string()),
            field: field.into(),
        }
    }

    pub fn session(message: impl Into<String>) -> Self {
        FabricError::Session(message.into())
    }

    pub fn remote_exit(command: impl Into<String>, message: impl Into<String>) -> Self {
        FabricError::RemoteExit {
            command: command.into(),
            message: message.into(),
        }
    }
}

impl From<ssh2::Error> for FabricError {
    fn from(err: ssh2::Error) -> Self {
        let io_err: std::io::Error = err.into();
        match io_err.kind() {
            std::io::ErrorKind::TimedOut => FabricError::session("SSH operation timed out"),
            std::io::ErrorKind::WouldBlock => FabricError::session("SSH operation would block"),
            _ => FabricError::session(format!("SSH error: {}", io_err)),
        }
    }
}
