use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("Invalid argument: {what}")]
    InvalidArg { what: &'static str },

    #[error("Cannot parse '{input}' as {expected}")]
    Parse { input: String, expected: String },

    #[error("Device '{name}' not found")]
    DeviceNotFound { name: String },

    #[error("Device '{name}' already registered")]
    DuplicateDevice { name: String },

    #[error("Device '{name}' has type '{actual}', expected '{expected}'")]
    DeviceTypeMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("Device '{name}' communication failed: {what}")]
    DeviceIo { name: String, what: String },

    #[error("Failed to spawn thread '{name}': {what}")]
    Thread { name: String, what: String },
}
