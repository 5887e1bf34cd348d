use derive_more::From;
use orion_error::{ErrorCode, StructError, UvsReason};
use pw_core::error::CoreReason;

#[derive(Debug, Clone, PartialEq, thiserror::Error, From)]
pub enum RuntimeReason {
    #[error("spawn error")]
    Spawn,
    #[error("stdio binding error")]
    Stdio,
    #[error("teardown error")]
    Teardown,
    #[error("{0}")]
    Core(CoreReason),
    #[error("{0}")]
    Uvs(UvsReason),
}

impl ErrorCode for RuntimeReason {
    fn error_code(&self) -> i32 {
        match self {
            Self::Spawn => 2101,
            Self::Stdio => 2102,
            Self::Teardown => 2103,
            Self::Core(c) => c.error_code(),
            Self::Uvs(u) => u.error_code(),
        }
    }
}

pub type RuntimeError = StructError<RuntimeReason>;
pub type RuntimeResult<T> = Result<T, RuntimeError>;
