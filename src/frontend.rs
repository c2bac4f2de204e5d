//! Collaborators the recorder drives but does not own.
//!
//! Rendering frames, laying out controls and editing step text belong to
//! whatever frontend embeds the recorder. These traits are the whole
//! contract between the two.

use std::path::Path;
use std::time::Duration;

use crate::variables::Prompter;

/// Receives captured frames and the status label.
pub trait FrameDisplay {
    /// A fresh frame was written to `path`
    fn show_frame(&mut self, path: &Path);
    /// Human-readable label for the current step and recorded time
    fn set_status(&mut self, label: &str);
}

/// Where the operator authors the lines of one step.
///
/// Also asks the operator for variable values while a step is committed.
pub trait EditingSurface: Prompter {
    /// A new step begins; editing is enabled until the next commit.
    fn begin_step(&mut self, ordinal: u32, run_time_secs: f64, hints: &TimingHints);

    /// Lines authored for the current step. `None` means there is nothing
    /// to commit and the recorder stays in Step mode.
    fn step_lines(&mut self) -> Option<String>;
}

/// Suggested settle times shown when a step begins. Not enforced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimingHints {
    pub sleep_secs: f64,
    pub barrier_timeout_secs: f64,
}

impl TimingHints {
    /// Minimum suggested sleep
    pub const MIN_SLEEP_SECS: f64 = 1.0;
    /// Barrier timeout as a multiple of the sleep hint
    pub const BARRIER_FACTOR: f64 = 5.0;

    /// Hints derived from the idle time since the last replay completed.
    pub fn from_idle(idle: Duration) -> Self {
        let sleep_secs = idle.as_secs_f64().max(Self::MIN_SLEEP_SECS);
        Self {
            sleep_secs,
            barrier_timeout_secs: sleep_secs * Self::BARRIER_FACTOR,
        }
    }

    /// Sleep hint rounded to whole seconds, as editors display it
    pub fn rounded_sleep(&self) -> u64 {
        self.sleep_secs.round() as u64
    }

    pub fn rounded_barrier_timeout(&self) -> u64 {
        self.barrier_timeout_secs.round() as u64
    }
}
