//! Shared fixtures for the session-level tests: a VM that records every call,
//! a display that counts frames, and an editing surface fed from a script.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use stepmaker::config_file::RecorderConfig;
use stepmaker::frontend::{EditingSurface, FrameDisplay, TimingHints};
use stepmaker::mode_state::{Collaborators, StepMaker};
use stepmaker::scheduler::{Clock, ManualClock};
use stepmaker::step_files::{FileHeader, StepFiles};
use stepmaker::types::MouseButton;
use stepmaker::variables::{ParamSet, Prompter};
use stepmaker::vm_control::{VmControl, VmError};
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Pause,
    Resume,
    SendKey(String),
    SendString(String),
    Screendump,
    MouseMove(i32, i32),
    MouseButton(MouseButton),
}

impl Call {
    /// Calls that come from replay rather than mode switching or capture
    pub fn is_input(&self) -> bool {
        !matches!(self, Call::Pause | Call::Resume | Call::Screendump)
    }
}

#[derive(Clone, Default)]
pub struct RecordingVm {
    pub calls: Rc<RefCell<Vec<Call>>>,
    pub dead: Rc<Cell<bool>>,
    pub screendump_fails: Rc<Cell<bool>>,
    pub pause_fails: Rc<Cell<bool>>,
    pub keys_fail: Rc<Cell<bool>>,
}

impl VmControl for RecordingVm {
    fn is_alive(&mut self) -> bool {
        !self.dead.get()
    }

    fn pause(&mut self) -> Result<(), VmError> {
        if self.pause_fails.get() {
            return Err(VmError::CommandFailed {
                verb: "pause",
                reason: "monitor busy".to_string(),
            });
        }
        self.calls.borrow_mut().push(Call::Pause);
        Ok(())
    }

    fn resume(&mut self) -> Result<(), VmError> {
        self.calls.borrow_mut().push(Call::Resume);
        Ok(())
    }

    fn send_key(&mut self, name: &str) -> Result<(), VmError> {
        self.calls.borrow_mut().push(Call::SendKey(name.to_string()));
        if self.keys_fail.get() {
            return Err(VmError::CommandFailed {
                verb: "sendkey",
                reason: format!("unknown key {}", name),
            });
        }
        Ok(())
    }

    fn send_string(&mut self, text: &str) -> Result<(), VmError> {
        self.calls.borrow_mut().push(Call::SendString(text.to_string()));
        Ok(())
    }

    fn screendump(&mut self, path: &Path) -> Result<(), VmError> {
        self.calls.borrow_mut().push(Call::Screendump);
        if self.screendump_fails.get() {
            return Err(VmError::Unavailable("monitor not connected".to_string()));
        }
        std::fs::write(path, b"P6\n1 1\n255\n\0\0\0").map_err(|e| VmError::Channel(e.to_string()))
    }

    fn mouse_move(&mut self, x: i32, y: i32) -> Result<(), VmError> {
        self.calls.borrow_mut().push(Call::MouseMove(x, y));
        Ok(())
    }

    fn mouse_button(&mut self, button: MouseButton) -> Result<(), VmError> {
        self.calls.borrow_mut().push(Call::MouseButton(button));
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct CountingDisplay {
    pub frames: Rc<Cell<usize>>,
    pub statuses: Rc<RefCell<Vec<String>>>,
}

impl FrameDisplay for CountingDisplay {
    fn show_frame(&mut self, _path: &Path) {
        self.frames.set(self.frames.get() + 1);
    }

    fn set_status(&mut self, label: &str) {
        self.statuses.borrow_mut().push(label.to_string());
    }
}

/// Editing surface that returns prepared text and prompt answers.
#[derive(Default)]
pub struct ScriptedSurface {
    pub text: Option<String>,
    pub answers: VecDeque<Option<String>>,
    pub prompted: Vec<String>,
    pub begun: Vec<u32>,
    pub hints: Vec<TimingHints>,
}

impl ScriptedSurface {
    pub fn with_text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            ..Self::default()
        }
    }

    pub fn answering(mut self, answers: &[Option<&str>]) -> Self {
        self.answers = answers.iter().map(|a| a.map(String::from)).collect();
        self
    }
}

impl Prompter for ScriptedSurface {
    fn prompt_variable(&mut self, name: &str) -> Option<String> {
        self.prompted.push(name.to_string());
        self.answers.pop_front().flatten()
    }
}

impl EditingSurface for ScriptedSurface {
    fn begin_step(&mut self, ordinal: u32, _run_time_secs: f64, hints: &TimingHints) {
        self.begun.push(ordinal);
        self.hints.push(*hints);
    }

    fn step_lines(&mut self) -> Option<String> {
        self.text.clone()
    }
}

pub struct Harness {
    pub session: StepMaker,
    pub clock: Rc<ManualClock>,
    pub vm: RecordingVm,
    pub display: CountingDisplay,
    pub steps_path: PathBuf,
    pub vars_path: PathBuf,
    pub dir: TempDir,
}

impl Harness {
    pub fn new(params: &[(&str, &str)]) -> Self {
        Self::with_vm(params, RecordingVm::default())
    }

    pub fn with_vm(params: &[(&str, &str)], vm: RecordingVm) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let steps_path = dir.path().join("steps").join("install.steps");
        std::fs::create_dir_all(steps_path.parent().unwrap()).unwrap();
        let data_dir = dir.path().join("data");
        let header = FileHeader {
            generated_on: "Mon Oct 19 10:00:00 2026".to_string(),
            host_identity: "Linux testhost".to_string(),
        };
        let files = StepFiles::create(&steps_path, &data_dir, &header).unwrap();
        let vars_path = files.vars_path().to_path_buf();

        let params: ParamSet = params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let clock = ManualClock::new();
        let display = CountingDisplay::default();
        let parts = Collaborators {
            vm: Box::new(vm.clone()),
            display: Box::new(display.clone()),
            clock: clock.clone() as Rc<dyn Clock>,
        };
        let session = StepMaker::start(
            &RecorderConfig::default(),
            dir.path().join("scrdump.ppm"),
            files,
            params,
            parts,
        )
        .unwrap();

        Self {
            session,
            clock,
            vm,
            display,
            steps_path,
            vars_path,
            dir,
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.vm.calls.borrow().clone()
    }

    /// Replay-originated calls in order
    pub fn input_calls(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_input).collect()
    }

    pub fn steps_text(&self) -> String {
        std::fs::read_to_string(&self.steps_path).unwrap()
    }

    pub fn vars_text(&self) -> String {
        std::fs::read_to_string(&self.vars_path).unwrap()
    }

    /// Advance the clock from deadline to deadline until the replay is done.
    pub fn finish_replay(&mut self) {
        self.session.poll();
        while self.session.is_replaying() {
            let next = self
                .session
                .next_deadline()
                .expect("a replay in flight always has a pending task");
            self.clock.advance_to(next);
            self.session.poll();
        }
    }

    /// break, done with `surface`, then run the replay to completion
    pub fn record_step(&mut self, surface: &mut ScriptedSurface) {
        self.session.request_break(surface).unwrap();
        self.session.request_done(surface).unwrap();
        self.finish_replay();
    }
}
