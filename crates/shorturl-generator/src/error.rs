use thiserror::Error;

/// Errors returned when configuring a generator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GeneratorError {
    #[error("invalid key length {length}; expected 1..={max}")]
    InvalidLength { length: usize, max: usize },
}
