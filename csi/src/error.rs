use thiserror::Error;

pub type CsiResult<T> = Result<T, CsiError>;

/// Status codes of the volume interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Code {
    InvalidArgument,
    NotFound,
    AlreadyExists,
    FailedPrecondition,
    Unavailable,
    Aborted,
    Unimplemented,
    Internal,
    OutOfRange,
    Unauthenticated,
}

#[derive(Error, Debug)]
pub enum CsiError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Failed precondition: {0}")]
    FailedPrecondition(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Aborted: {0}")]
    Aborted(String),

    #[error("Unimplemented: {0}")]
    Unimplemented(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Out of range: {0}")]
    OutOfRange(String),

    #[error("Authentication error: {0}")]
    Unauthenticated(String),

    #[error("Store error: {0}")]
    Store(#[from] apis::StoreError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] scheduler::SchedulerError),

    #[error("Volume group error: {0}")]
    Group(#[from] volumegroup::GroupError),

    #[error("System error: {0}")]
    System(#[from] system::SystemError),
}

impl CsiError {
    pub fn code(&self) -> Code {
        match self {
            CsiError::InvalidArgument(_) => Code::InvalidArgument,
            CsiError::NotFound(_) => Code::NotFound,
            CsiError::AlreadyExists(_) => Code::AlreadyExists,
            CsiError::FailedPrecondition(_) => Code::FailedPrecondition,
            CsiError::Unavailable(_) => Code::Unavailable,
            CsiError::Aborted(_) => Code::Aborted,
            CsiError::Unimplemented(_) => Code::Unimplemented,
            CsiError::Internal(_) => Code::Internal,
            CsiError::OutOfRange(_) => Code::OutOfRange,
            CsiError::Unauthenticated(_) => Code::Unauthenticated,
            CsiError::Store(e) if e.is_not_found() => Code::NotFound,
            CsiError::Store(e) if e.is_already_exists() => Code::AlreadyExists,
            CsiError::Store(e) if e.is_conflict() => Code::Aborted,
            CsiError::Store(_) => Code::Internal,
            CsiError::Scheduler(_) => Code::Unavailable,
            CsiError::Group(_) | CsiError::System(_) => Code::Internal,
        }
    }

    /// Whether the caller should simply retry later.
    pub fn is_transient(&self) -> bool {
        matches!(self.code(), Code::Unavailable | Code::Aborted)
    }
}

impl Code {
    pub fn grpc_code(&self) -> tonic::Code {
        match self {
            Code::InvalidArgument => tonic::Code::InvalidArgument,
            Code::NotFound => tonic::Code::NotFound,
            Code::AlreadyExists => tonic::Code::AlreadyExists,
            Code::FailedPrecondition => tonic::Code::FailedPrecondition,
            Code::Unavailable => tonic::Code::Unavailable,
            Code::Aborted => tonic::Code::Aborted,
            Code::Unimplemented => tonic::Code::Unimplemented,
            Code::Internal => tonic::Code::Internal,
            Code::OutOfRange => tonic::Code::OutOfRange,
            Code::Unauthenticated => tonic::Code::Unauthenticated,
        }
    }
}

impl From<CsiError> for tonic::Status {
    fn from(err: CsiError) -> Self {
        tonic::Status::new(err.code().grpc_code(), err.to_string())
    }
}
