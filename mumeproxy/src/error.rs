use std::io;

use config as config_crate;
use thiserror::Error;
use tokio::sync::mpsc::error::SendError;
use tracing_error::SpanTrace;

#[derive(Debug, Error)]
#[error("error: {kind}\n{span}")]
pub struct Error {
    pub(crate) kind: Box<ErrorKind>,
    pub(crate) span: SpanTrace,
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::from(ErrorKind::from(err))
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self {
            kind: kind.into(),
            span: SpanTrace::capture(),
        }
    }
}

#[derive(Debug, Error)]
pub(crate) enum ErrorKind {
    #[error("unexpected I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid CLI arg: {0}")]
    Cli(String),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("unexpected internal error: {0}")]
    Internal(String),
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Self::from(ErrorKind::from(err))
    }
}

impl<T> From<SendError<T>> for ErrorKind {
    fn from(value: SendError<T>) -> Self {
        Self::Internal(format!("sending message: {value}"))
    }
}

#[derive(Debug, Error)]
#[allow(clippy::module_name_repetitions)]
pub enum ConfigError {
    #[error("deserializing TOML content: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("{0}")]
    General(#[from] config_crate::ConfigError),

    #[error("invalid config value: {0}")]
    InvalidValue(String),
}
