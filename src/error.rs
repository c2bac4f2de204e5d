//! Error handling module for the step recorder
//!
//! Provides centralized error handling with proper error types using thiserror.
//! Component-level errors (codec, VM, mode transitions) convert into
//! `StepMakerError` so callers deal with one type.

use thiserror::Error;

use crate::mode_state::ModeTransitionError;
use crate::step_codec::CodecError;
use crate::vm_control::VmError;

/// Main error type for the step recorder
#[derive(Error, Debug)]
pub enum StepMakerError {
    /// IO errors on the step/vars files or the capture artifact
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors (loading, parsing, validation)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Preflight violations: no VM, VM not alive, step file already exists
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Mode state machine refused a transition
    #[error("Mode transition error: {0}")]
    Transition(#[from] ModeTransitionError),

    /// A captured action line could not be decoded
    #[error("Step line error: {0}")]
    Codec(#[from] CodecError),

    /// The VM control interface reported a failure
    #[error("VM control error: {0}")]
    Vm(#[from] VmError),

    /// The operator abandoned a variable prompt
    #[error("Prompt for variable '{0}' was cancelled")]
    PromptCancelled(String),
}

/// Result type alias for step recorder operations
pub type Result<T> = std::result::Result<T, StepMakerError>;

impl StepMakerError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a precondition error
    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition(msg.into())
    }

    /// True for errors that leave the session untouched and may be retried
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Transition(_) | Self::Codec(_) | Self::Vm(_) | Self::PromptCancelled(_)
        )
    }
}
