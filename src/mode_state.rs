//! Recording session state machine
//!
//! `StepMaker` owns everything a recording session needs: the mode, the step
//! counter, run-time accounting, the variable store, the two output files and
//! the task queue that drives screen capture and replay.
//!
//! # Mode Flow
//!
//! ```text
//!        start
//!          ↓
//!   ┌──── Run ◄─────────────┐
//!   │  (VM running,         │
//!   │   capture armed)      │ done: resolve vars, persist,
//!   │                       │       resume, replay
//!   │ break (VM alive,      │
//!   │        no replay)     │
//!   ↓                       │
//!  Step ────────────────────┘
//!  (VM paused, editing)
//! ```
//!
//! # Invariants
//!
//! - The step ordinal starts at 1 and grows by exactly one per committed
//!   step, once that step's replay has finished.
//! - At most one capture tick is pending at any time, and none in Step mode.
//! - A refused or aborted intent leaves mode, files and bindings untouched.
//! - A replay, once started, always runs to completion.

use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::{Duration, Instant};

use strum::Display;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::capture::{CaptureOutcome, ScreenCaptureScheduler};
use crate::config_file::RecorderConfig;
use crate::error::{Result, StepMakerError};
use crate::frontend::{EditingSurface, FrameDisplay, TimingHints};
use crate::replay::{ActiveReplay, ReplayEngine, ReplayProgress, ReplayReport};
use crate::scheduler::{Clock, TaskQueue};
use crate::step_codec::StepRecord;
use crate::step_files::StepFiles;
use crate::types::Mode;
use crate::variables::{self, ParamSet, VariableStore};
use crate::vm_control::{VmControl, VmError};

/// Operator requests the state machine reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Intent {
    Break,
    Done,
}

/// Errors that can occur when an intent is refused
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModeTransitionError {
    /// The VM did not answer the liveness check
    #[error("The VM doesn't seem to be alive")]
    VmNotAlive,

    /// The intent is not valid in the current mode
    #[error("Cannot {intent} while in {mode} mode")]
    WrongMode { intent: Intent, mode: Mode },

    /// The previous step is still being replayed
    #[error("Replay of step {ordinal} is still in progress")]
    ReplayInProgress { ordinal: u32 },

    /// The session has been shut down
    #[error("The recording session has been shut down")]
    ShutDown,
}

/// Work items on the session loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    CaptureTick,
    ReplayNext,
}

/// Result of a "done" intent that was not refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoneOutcome {
    /// The editing surface had nothing to commit; still in Step mode
    NothingToDo,
    /// The step was persisted and its replay started
    Committed {
        ordinal: u32,
        introduced_vars: usize,
        replay_commands: usize,
    },
}

/// Objects the session talks to but does not create.
pub struct Collaborators {
    pub vm: Box<dyn VmControl>,
    pub display: Box<dyn FrameDisplay>,
    pub clock: Rc<dyn Clock>,
}

/// Check the caller-side contract before a session is constructed.
///
/// Requires a VM that reports itself alive and a step file path that does
/// not exist yet. Nothing is created on disk.
pub fn preflight(vm: Option<&mut dyn VmControl>, steps_path: Option<&Path>) -> Result<PathBuf> {
    let vm = vm.ok_or_else(|| StepMakerError::precondition("VM object not found"))?;
    if !vm.is_alive() {
        return Err(StepMakerError::precondition(
            "VM seems to be dead; Step Maker requires a living VM",
        ));
    }

    let steps_path =
        steps_path.ok_or_else(|| StepMakerError::precondition("Steps filename not specified"))?;
    if steps_path.exists() {
        return Err(StepMakerError::precondition(format!(
            "Steps file {} already exists",
            steps_path.display()
        )));
    }
    Ok(steps_path.to_path_buf())
}

/// A recording session.
pub struct StepMaker {
    vm: Box<dyn VmControl>,
    display: Box<dyn FrameDisplay>,
    clock: Rc<dyn Clock>,

    files: StepFiles,
    params: ParamSet,
    vars: VariableStore,

    mode: Mode,
    step_num: u32,
    run_time: Duration,
    time_when_done: Instant,
    time_when_actions_completed: Instant,

    queue: TaskQueue<Task>,
    capture: ScreenCaptureScheduler,
    initial_capture_delay: Duration,
    replay_engine: ReplayEngine,
    replay: Option<ActiveReplay>,
    last_replay: Option<ReplayReport>,

    shut_down: bool,
}

impl StepMaker {
    /// Start a session: resume the VM and enter Run mode.
    pub fn start(
        config: &RecorderConfig,
        screendump_path: PathBuf,
        files: StepFiles,
        params: ParamSet,
        parts: Collaborators,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| StepMakerError::config(e.to_string()))?;

        let now = parts.clock.now();
        let mut session = Self {
            vm: parts.vm,
            display: parts.display,
            clock: parts.clock,
            files,
            params,
            vars: VariableStore::new(),
            mode: Mode::Run,
            step_num: 1,
            run_time: Duration::ZERO,
            time_when_done: now,
            time_when_actions_completed: now,
            queue: TaskQueue::new(),
            capture: ScreenCaptureScheduler::new(screendump_path, config.update_delay()),
            initial_capture_delay: config.initial_capture_delay(),
            replay_engine: ReplayEngine::new(config.replay_timing()),
            replay: None,
            last_replay: None,
            shut_down: false,
        };

        session.switch_to_run_mode()?;
        info!("Step Maker session started");
        Ok(session)
    }

    #[inline]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Ordinal of the step that the next break will start
    #[inline]
    pub fn step_number(&self) -> u32 {
        self.step_num
    }

    /// Free-run time accumulated up to the last break
    #[inline]
    pub fn run_time(&self) -> Duration {
        self.run_time
    }

    pub fn variables(&self) -> &VariableStore {
        &self.vars
    }

    pub fn files(&self) -> &StepFiles {
        &self.files
    }

    #[inline]
    pub fn is_replaying(&self) -> bool {
        self.replay.is_some()
    }

    pub fn last_replay(&self) -> Option<ReplayReport> {
        self.last_replay
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    pub fn capture(&self) -> &ScreenCaptureScheduler {
        &self.capture
    }

    /// Whether a capture tick is currently pending
    pub fn capture_armed(&self) -> bool {
        self.capture.is_armed(&self.queue)
    }

    pub fn pending_tasks(&self) -> usize {
        self.queue.len()
    }

    /// When the loop next has work, if ever
    pub fn next_deadline(&self) -> Option<Instant> {
        self.queue.next_deadline()
    }

    /// Time from the session clock's "now" until the next task is due
    pub fn time_until_next_task(&self) -> Option<Duration> {
        let now = self.clock.now();
        self.queue
            .next_deadline()
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    /// Label describing the current step and recorded time
    pub fn status_label(&self) -> String {
        let secs = self.run_time.as_secs_f64();
        match self.mode {
            Mode::Step => format!("Step Maker -- step {} at time {:.2}", self.step_num, secs),
            Mode::Run => {
                let mut label = if self.replay.is_some() {
                    format!(
                        "Step Maker -- running (replaying step {}, recorded time {:.2})",
                        self.step_num, secs
                    )
                } else {
                    format!(
                        "Step Maker -- running (next step {}, recorded time {:.2})",
                        self.step_num, secs
                    )
                };
                if let Some(report) = self.last_replay.filter(|r| !r.is_clean()) {
                    label.push_str(&format!(
                        " [last replay: {} command(s) failed]",
                        report.failed
                    ));
                }
                label
            }
        }
    }

    /// Run every task whose deadline has passed. Returns how many ran.
    pub fn poll(&mut self) -> usize {
        let mut ran = 0;
        loop {
            let now = self.clock.now();
            let Some(task) = self.queue.pop_due(now) else {
                break;
            };
            self.dispatch(task, now);
            ran += 1;
        }
        ran
    }

    fn dispatch(&mut self, task: Task, now: Instant) {
        match task {
            Task::CaptureTick => self.on_capture_tick(now),
            Task::ReplayNext => self.on_replay_next(now),
        }
    }

    fn on_capture_tick(&mut self, now: Instant) {
        self.capture.stop(&mut self.queue, now);
        if !self.mode.captures() {
            return;
        }
        if let CaptureOutcome::Skipped(e) =
            self.capture.capture_frame(self.vm.as_mut(), self.display.as_mut())
        {
            debug!("Capture tick skipped ({}), keeping schedule", e);
        }
        self.capture.rearm(&mut self.queue, now, Task::CaptureTick);
    }

    fn on_replay_next(&mut self, now: Instant) {
        let Some(active) = self.replay.as_mut() else {
            return;
        };
        match active.step(self.vm.as_mut()) {
            ReplayProgress::Continue(delay) => {
                self.queue.schedule(now + delay, Task::ReplayNext);
            }
            ReplayProgress::Finished(report) => {
                self.replay = None;
                self.complete_replay(report, now);
            }
        }
    }

    fn complete_replay(&mut self, report: ReplayReport, now: Instant) {
        self.last_replay = Some(report);
        self.time_when_actions_completed = now;
        info!(
            "Step {} replayed: {} executed, {} failed, {} skipped",
            self.step_num, report.executed, report.failed, report.skipped
        );
        self.step_num += 1;
        self.publish_status();
    }

    /// Run what is left of the current replay, sleeping on the session clock
    /// between commands.
    fn drain_replay(&mut self) {
        let Some(mut active) = self.replay.take() else {
            return;
        };
        info!(
            "Finishing replay of step {} ({} command(s) left)",
            self.step_num,
            active.remaining()
        );
        loop {
            match active.step(self.vm.as_mut()) {
                ReplayProgress::Continue(delay) => self.clock.sleep(delay),
                ReplayProgress::Finished(report) => {
                    let now = self.clock.now();
                    self.complete_replay(report, now);
                    return;
                }
            }
        }
    }

    /// Run → Step: pause the VM and open the editing surface.
    ///
    /// # Errors
    ///
    /// - `WrongMode` if not in Run mode
    /// - `ReplayInProgress` while the previous step is still replaying
    /// - `VmNotAlive` if the VM fails the liveness check
    /// - `Vm` if the VM refuses to pause (mode unchanged)
    pub fn request_break(&mut self, surface: &mut dyn EditingSurface) -> Result<TimingHints> {
        self.guard(Intent::Break, Mode::Run)?;
        if self.replay.is_some() {
            return Err(ModeTransitionError::ReplayInProgress {
                ordinal: self.step_num,
            }
            .into());
        }
        if !self.vm.is_alive() {
            warn!("Break refused: VM is not alive");
            return Err(ModeTransitionError::VmNotAlive.into());
        }

        self.switch_to_step_mode()?;

        let now = self.clock.now();
        self.run_time += now.saturating_duration_since(self.time_when_done);
        let hints =
            TimingHints::from_idle(now.saturating_duration_since(self.time_when_actions_completed));

        info!(
            "Step {} started at recorded time {:.2}",
            self.step_num,
            self.run_time.as_secs_f64()
        );
        surface.begin_step(self.step_num, self.run_time.as_secs_f64(), &hints);
        self.publish_status();
        Ok(hints)
    }

    /// Step → Run: commit the authored step, resume the VM and replay it.
    ///
    /// # Errors
    ///
    /// - `WrongMode` if not in Step mode
    /// - `Codec` if an action line is malformed (nothing written)
    /// - `PromptCancelled` if the operator abandons a variable prompt
    ///   (nothing written)
    /// - `Io` if the step or vars file cannot be written
    pub fn request_done(&mut self, surface: &mut dyn EditingSurface) -> Result<DoneOutcome> {
        self.guard(Intent::Done, Mode::Step)?;

        let Some(raw) = surface.step_lines() else {
            debug!("Editing surface has nothing to commit");
            return Ok(DoneOutcome::NothingToDo);
        };
        let record = StepRecord::decode(self.step_num, self.run_time.as_secs_f64(), &raw)?;
        if record.is_empty() {
            debug!("Step {} is empty, staying in step mode", self.step_num);
            return Ok(DoneOutcome::NothingToDo);
        }

        let introduced = variables::resolve_declarations(
            &self.vars,
            record.declared_variables(),
            &self.params,
            surface,
        )?;

        self.files.append_vars(&introduced)?;
        let introduced = self.vars.commit(introduced);
        self.files.append_step(&record)?;

        self.time_when_done = self.clock.now();

        if let Err(e) = self.switch_to_run_mode() {
            error!("Failed to resume VM after step {}: {}", self.step_num, e);
        }

        let plan = self.replay_engine.plan(record.lines(), &self.vars);
        let replay_commands = plan.len();
        self.replay = Some(ActiveReplay::new(plan));
        self.queue.schedule(self.clock.now(), Task::ReplayNext);

        info!(
            "Step {} committed ({} new var(s), {} replay command(s))",
            self.step_num,
            introduced.len(),
            replay_commands
        );
        self.publish_status();
        Ok(DoneOutcome::Committed {
            ordinal: record.ordinal(),
            introduced_vars: introduced.len(),
            replay_commands,
        })
    }

    /// Stop capture, finish any replay in flight, close the files and resume
    /// the VM. Idempotent.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;

        let now = self.clock.now();
        self.capture.stop(&mut self.queue, now);
        self.drain_replay();
        self.queue.clear();

        let closed = self.files.close();
        if let Err(e) = self.vm.resume() {
            warn!("Failed to resume VM on shutdown: {}", e);
        }
        info!("Step Maker session closed after {} step(s)", self.step_num - 1);
        closed
    }

    fn guard(&self, intent: Intent, expected: Mode) -> std::result::Result<(), ModeTransitionError> {
        if self.shut_down {
            return Err(ModeTransitionError::ShutDown);
        }
        if self.mode != expected {
            return Err(ModeTransitionError::WrongMode {
                intent,
                mode: self.mode,
            });
        }
        Ok(())
    }

    fn switch_to_run_mode(&mut self) -> std::result::Result<(), VmError> {
        let now = self.clock.now();
        self.mode = Mode::Run;
        self.capture.reschedule(
            &mut self.queue,
            now,
            self.initial_capture_delay,
            Some(Task::CaptureTick),
        );
        self.publish_status();
        self.vm.resume()
    }

    fn switch_to_step_mode(&mut self) -> std::result::Result<(), VmError> {
        self.vm.pause()?;
        let now = self.clock.now();
        self.capture.stop(&mut self.queue, now);
        self.mode = Mode::Step;
        Ok(())
    }

    fn publish_status(&mut self) {
        let label = self.status_label();
        self.display.set_status(&label);
    }
}

impl Drop for StepMaker {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!("Error while closing session: {}", e);
        }
    }
}
