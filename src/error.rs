use thiserror::Error;

/// Error returned by a [`Record`](crate::Record) write that did not go through.
///
/// The engine itself never produces this error: when one of its own writes is
/// rejected it logs the rejection and leaves the record in whatever state the
/// host settled into.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    /// The record's validator rejected the prospective attributes.
    ///
    /// Nothing was written and `Topic::Invalid` listeners have been notified.
    #[error("record rejected write: {}", errors.join("; "))]
    Invalid {
        /// Messages returned by the validator, in the order it produced them
        errors: Vec<String>,
    },
}

/// Error returned when an [`EngineConfig`](crate::EngineConfig) cannot be loaded.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration source is not valid JSON or has the wrong shape
    #[error("invalid engine configuration: {0}")]
    Parse(#[from] serde_json::Error),
}
