//! Contract for the virtual machine control interface.
//!
//! The recorder never talks to a hypervisor directly. Everything it needs is
//! expressed through `VmControl`, and every replayed action is first turned
//! into a `VmCommand` so the command stream can be inspected, logged and
//! scheduled independently of the object that executes it.

use std::fmt;
use std::fs;
use std::path::Path;

use thiserror::Error;
use tracing::info;

use crate::types::MouseButton;

/// Failures reported by the control interface.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VmError {
    /// The VM cannot serve the request right now (e.g. no frame available)
    #[error("VM not ready: {0}")]
    Unavailable(String),

    /// The command was delivered but the VM side rejected it
    #[error("'{verb}' failed: {reason}")]
    CommandFailed { verb: &'static str, reason: String },

    /// The control channel itself could not be used
    #[error("control channel error: {0}")]
    Channel(String),
}

/// Operations the recorder needs from a running VM.
///
/// # Contract
///
/// - Calls are made from a single thread, one at a time.
/// - `screendump` writes a fresh frame to `path` or fails with
///   `VmError::Unavailable`; it never leaves a partial file behind on success.
/// - `mouse_button(0)` releases every button.
pub trait VmControl {
    fn is_alive(&mut self) -> bool;
    fn pause(&mut self) -> Result<(), VmError>;
    fn resume(&mut self) -> Result<(), VmError>;
    fn send_key(&mut self, name: &str) -> Result<(), VmError>;
    fn send_string(&mut self, text: &str) -> Result<(), VmError>;
    fn screendump(&mut self, path: &Path) -> Result<(), VmError>;
    fn mouse_move(&mut self, x: i32, y: i32) -> Result<(), VmError>;
    fn mouse_button(&mut self, button: MouseButton) -> Result<(), VmError>;
}

/// One call against the control interface, produced by replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmCommand {
    SendKey(String),
    SendString(String),
    MouseMove { x: i32, y: i32 },
    MouseButton(MouseButton),
}

impl VmCommand {
    /// Execute this command against `vm`.
    pub fn apply(&self, vm: &mut dyn VmControl) -> Result<(), VmError> {
        match self {
            Self::SendKey(name) => vm.send_key(name),
            Self::SendString(text) => vm.send_string(text),
            Self::MouseMove { x, y } => vm.mouse_move(*x, *y),
            Self::MouseButton(button) => vm.mouse_button(*button),
        }
    }
}

impl fmt::Display for VmCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SendKey(name) => write!(f, "sendkey {}", name),
            // Typed text may be a password; keep it out of logs
            Self::SendString(text) => write!(f, "sendstring <{} chars>", text.chars().count()),
            Self::MouseMove { x, y } => write!(f, "mouse_move {} {}", x, y),
            Self::MouseButton(button) => write!(f, "mouse_button {}", button),
        }
    }
}

/// Minimal binary PPM (1x1, black) written by the dry-run VM.
const BLANK_FRAME: &[u8] = b"P6\n1 1\n255\n\0\0\0";

/// Control interface that executes nothing and logs every call.
///
/// Always alive. Frames are a single black pixel so the capture path is
/// exercised end to end.
#[derive(Debug, Default)]
pub struct DryRunVm {
    paused: bool,
}

impl DryRunVm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }
}

impl VmControl for DryRunVm {
    fn is_alive(&mut self) -> bool {
        true
    }

    fn pause(&mut self) -> Result<(), VmError> {
        info!("[DRY RUN] pause");
        self.paused = true;
        Ok(())
    }

    fn resume(&mut self) -> Result<(), VmError> {
        info!("[DRY RUN] resume");
        self.paused = false;
        Ok(())
    }

    fn send_key(&mut self, name: &str) -> Result<(), VmError> {
        info!("[DRY RUN] sendkey {}", name);
        Ok(())
    }

    fn send_string(&mut self, text: &str) -> Result<(), VmError> {
        info!("[DRY RUN] sendstring ({} chars)", text.chars().count());
        Ok(())
    }

    fn screendump(&mut self, path: &Path) -> Result<(), VmError> {
        fs::write(path, BLANK_FRAME).map_err(|e| VmError::Channel(e.to_string()))
    }

    fn mouse_move(&mut self, x: i32, y: i32) -> Result<(), VmError> {
        info!("[DRY RUN] mouse_move {} {}", x, y);
        Ok(())
    }

    fn mouse_button(&mut self, button: MouseButton) -> Result<(), VmError> {
        info!("[DRY RUN] mouse_button {}", button);
        Ok(())
    }
}
