use std::fmt;

// Error
pub type AppResult<T> = Result<T, RuntimeError>;

#[derive(Debug)]
pub enum RuntimeError {
    /// The container driver failed to run/exec/stop/remove/list a container.
    Driver(String),
    /// Exec completed but the driver couldn't report a usable result.
    Exec(String),
    /// Writing or reading the handler file on the shared volume failed.
    HandlerStore(String),
    System(String),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::Driver(e) => write!(f, "Driver Error: {e}"),
            RuntimeError::Exec(e) => write!(f, "{e}"),
            RuntimeError::HandlerStore(e) => write!(f, "Handler Store Error: {e}"),
            RuntimeError::System(e) => write!(f, "System Error: {e}"),
        }
    }
}

impl std::error::Error for RuntimeError {}
