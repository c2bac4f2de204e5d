//! Step Maker Library
//!
//! Records operator input to a running virtual machine as a replayable step
//! file. The session alternates between Run mode (VM running, screen
//! captured periodically) and Step mode (VM paused, operator authoring one
//! step); committing a step persists it and replays it against the VM.

pub mod capture;
pub mod cli;
pub mod config_file;
pub mod console;
pub mod control_helper;
pub mod error;
pub mod frontend;
pub mod mode_state;
pub mod process_guard;
pub mod replay;
pub mod scheduler;
pub mod step_codec;
pub mod step_files;
pub mod types;
pub mod variables;
pub mod vm_control;

// Re-export main types for convenience
pub use capture::{CaptureOutcome, ScreenCaptureScheduler};
pub use config_file::RecorderConfig;
pub use control_helper::{run_helper, ControlArgs, HelperOutput, HelperRequest, HelperVm};
pub use error::{Result, StepMakerError};
pub use frontend::{EditingSurface, FrameDisplay, TimingHints};
pub use mode_state::{
    Collaborators, DoneOutcome, Intent, ModeTransitionError, StepMaker, Task, preflight,
};
pub use process_guard::{CommandProcessGroup, HelperRegistry, ProcessGuard};
pub use replay::{ActiveReplay, ReplayEngine, ReplayPlan, ReplayReport, ReplayTiming};
pub use scheduler::{Clock, ManualClock, SystemClock, TaskQueue, TimerSlot};
pub use step_codec::{ActionLine, CodecError, StepRecord};
pub use step_files::{FileHeader, StepFiles};
pub use types::{ActionKind, Mode, MouseButton};
pub use variables::{ParamSet, Prompter, Resolution, VariableStore};
pub use vm_control::{DryRunVm, VmCommand, VmControl, VmError};
