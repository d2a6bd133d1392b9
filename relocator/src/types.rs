use thiserror::Error;

/// Recoverable relocation failures.
///
/// Broken relocator invariants are not represented here; those panic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelocateError {
    #[error("only {available} relocatable bytes before end of input, need {required}")]
    InsufficientInput { available: usize, required: usize },

    #[error("output has {available} bytes left, relocated code needs up to {required}")]
    OutputTooSmall { available: usize, required: usize },
}

pub type Result<T> = std::result::Result<T, RelocateError>;
