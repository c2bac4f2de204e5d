//! Small shared types for the step recorder
//!
//! Enums here derive their string forms through strum so the keyword table
//! lives in exactly one place.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Recorder mode. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum Mode {
    /// VM executing, capture timer armed, editing disabled
    #[default]
    Run,
    /// VM paused, capture idle, editing enabled
    Step,
}

impl Mode {
    /// Whether the editing surface accepts input in this mode
    pub const fn editing_enabled(self) -> bool {
        matches!(self, Self::Step)
    }

    /// Whether the periodic screen capture runs in this mode
    pub const fn captures(self) -> bool {
        matches!(self, Self::Run)
    }
}

/// Leading keyword of a step line that the replay engine acts upon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum ActionKind {
    Key,
    Var,
    #[strum(serialize = "mousemove")]
    MouseMove,
    #[strum(serialize = "mouseclick")]
    MouseClick,
}

impl ActionKind {
    /// Number of whitespace-separated arguments the keyword requires
    pub const fn arity(self) -> usize {
        match self {
            Self::Key | Self::Var | Self::MouseClick => 1,
            Self::MouseMove => 2,
        }
    }
}

/// Mouse button number as understood by the control interface.
/// Button `0` means "release all".
pub type MouseButton = u8;

/// Button value sent after a click to release every button
pub const RELEASE_ALL_BUTTONS: MouseButton = 0;
