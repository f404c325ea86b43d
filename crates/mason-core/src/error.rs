//! Error types for Mason

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("no rule to build target: {target}")]
    NoRuleForTarget { target: String },

    #[error("dependency cycle: {}", .path.join(" -> "))]
    CycleDetected { path: Vec<String> },

    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("multiple default tasks: '{first}' and '{second}'")]
    MultipleDefaults { first: String, second: String },

    #[error("handler failed for '{target}': {message}")]
    HandlerFailed { target: String, message: String },

    #[error("rule for '{target}' succeeded but produced no output file")]
    TargetNotProduced { target: String },

    #[error("check probe failed for '{resource}': {message}")]
    CheckProbeFailed { resource: String, message: String },

    #[error("interrupted")]
    Interrupted,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Process exit code for this error: configuration errors exit 2,
    /// build errors exit 1.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::NoRuleForTarget { .. }
            | Self::CycleDetected { .. }
            | Self::InvalidPattern { .. }
            | Self::MultipleDefaults { .. } => 2,
            _ => 1,
        }
    }

    pub fn invalid_pattern(pattern: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPattern {
            pattern: pattern.into(),
            reason: reason.into(),
        }
    }

    pub fn handler_failed(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::HandlerFailed {
            target: target.into(),
            message: message.into(),
        }
    }

    pub fn check_probe_failed(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CheckProbeFailed {
            resource: resource.into(),
            message: message.into(),
        }
    }
}
