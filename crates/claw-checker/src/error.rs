//! Error types for the claw-checker crate.
//!
//! Errors come in two tiers. [`EvaluationError`] describes conditions found
//! while evaluating a trigger (missing series, bad targets, expression
//! failures); the checker absorbs them into the trigger state. Everything else
//! in [`CheckerError`] is an infrastructure failure that leaves the trigger for
//! the next scheduled attempt.

use thiserror::Error;

/// Infrastructure-level errors returned from the checker and its storage.
#[derive(Debug, Error)]
pub enum CheckerError {
    /// The trigger was deleted; callers skip it silently.
    #[error("trigger does not exist: {id}")]
    TriggerNotExists {
        /// The trigger ID that was not found.
        id: String,
    },

    /// The storage backend failed.
    #[error("storage error: {reason}")]
    Storage {
        /// The reason the storage operation failed.
        reason: String,
    },

    /// A distributed lock could not be acquired in time.
    #[error("failed to acquire lock: {key}")]
    Lock {
        /// The lock key.
        key: String,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An evaluation condition surfaced while checking a trigger.
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),
}

impl From<serde_json::Error> for CheckerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<ExpressionError> for CheckerError {
    fn from(err: ExpressionError) -> Self {
        Self::Evaluation(EvaluationError::from(err))
    }
}

/// Conditions found while evaluating a trigger.
///
/// The display text becomes the trigger's check message.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvaluationError {
    /// No series at all were produced for the main target.
    #[error("Trigger has no metrics, check your target")]
    NoTimeSeries,

    /// The main target produced only wildcard series.
    #[error("Trigger never received metrics")]
    OnlyWildcards,

    /// Several series share a name after target transformation.
    #[error("Trigger has same timeseries names: {}", names.join(", "))]
    SameSeriesNames {
        /// The duplicated names.
        names: Vec<String>,
    },

    /// An additional target resolved to more than one series (1-indexed).
    #[error("Target t{0} has more than one metric")]
    WrongTriggerTarget(usize),

    /// A target or expression called a function that does not exist.
    #[error("Unknown function: \"{0}\"")]
    UnknownFunction(String),

    /// A target could not be parsed or a function got bad arguments.
    #[error("Invalid target \"{target}\": {reason}")]
    InvalidTarget {
        /// The offending target text.
        target: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The trigger expression failed to evaluate.
    #[error("Failed to evaluate trigger expression: {0}")]
    Expression(ExpressionError),

    /// The remote render endpoint failed or is not configured.
    #[error("Remote server unavailable: {0}")]
    Remote(String),
}

impl From<ExpressionError> for EvaluationError {
    fn from(err: ExpressionError) -> Self {
        match err {
            ExpressionError::UnknownFunction(name) => Self::UnknownFunction(name),
            other => Self::Expression(other),
        }
    }
}

/// Errors raised while parsing or evaluating a trigger expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpressionError {
    /// The expression text could not be parsed.
    #[error("parse error at {position}: {reason}")]
    Parse {
        /// Byte offset of the failure.
        position: usize,
        /// What went wrong.
        reason: String,
    },

    /// The expression references a variable that is not bound.
    #[error("unknown variable: {0}")]
    UnknownVariable(String),

    /// The expression calls a function that does not exist.
    #[error("unknown function: {0}")]
    UnknownFunction(String),

    /// Operand types do not fit the operator.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// The expression did not produce a state label.
    #[error("expression result is not a state: {0}")]
    NotAState(String),

    /// A threshold trigger has neither a warn nor an error value.
    #[error("warn and error values can not both be empty")]
    MissingThresholds,

    /// An expression trigger has no expression.
    #[error("expression trigger has no expression")]
    MissingExpression,
}

/// Result type for checker operations.
pub type Result<T> = std::result::Result<T, CheckerError>;
