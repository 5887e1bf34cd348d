use derive_more::From;
use orion_error::{ErrorCode, StructError, UvsReason};

#[derive(Debug, Clone, PartialEq, thiserror::Error, From)]
pub enum CoreReason {
    #[error("configuration error")]
    Config,
    #[error("no matching provider")]
    Provider,
    #[error("stream setup error")]
    Setup,
    #[error("stream copy error")]
    Stream,
    #[error("{0}")]
    Uvs(UvsReason),
}

impl ErrorCode for CoreReason {
    fn error_code(&self) -> i32 {
        match self {
            Self::Config => 1101,
            Self::Provider => 1102,
            Self::Setup => 1103,
            Self::Stream => 1104,
            Self::Uvs(u) => u.error_code(),
        }
    }
}

pub type CoreError = StructError<CoreReason>;
pub type CoreResult<T> = Result<T, CoreError>;
