//! Replay of a freshly captured step against the live VM.
//!
//! Replay happens in two stages. `ReplayEngine::plan` turns the step's lines
//! into a flat list of `VmCommand`s, each followed by a settle delay. The
//! plan is then executed either one command per loop task (`ActiveReplay`,
//! used by the recorder so capture ticks keep running during settle delays)
//! or in one go with thread sleeps (`ReplayEngine::run_blocking`).
//!
//! Replay is best effort: a failing command is logged and counted and the
//! rest of the plan still runs.

use std::collections::VecDeque;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::step_codec::ActionLine;
use crate::types::RELEASE_ALL_BUTTONS;
use crate::variables::VariableStore;
use crate::vm_control::{VmCommand, VmControl};

/// Delays and positions used when expanding mouse actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayTiming {
    /// Wait after each phase of a two-phase mouse move
    pub mouse_settle: Duration,
    /// Wait between pressing a button and releasing all buttons
    pub click_release: Duration,
    /// Out-of-frame position used to normalize the pointer before a move
    pub sentinel: (i32, i32),
}

impl Default for ReplayTiming {
    fn default() -> Self {
        Self {
            mouse_settle: Duration::from_millis(500),
            click_release: Duration::from_millis(100),
            sentinel: (-8000, -8000),
        }
    }
}

/// A command plus the time to wait before the next one may run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedCommand {
    pub command: VmCommand,
    pub delay_after: Duration,
}

impl TimedCommand {
    fn now(command: VmCommand) -> Self {
        Self {
            command,
            delay_after: Duration::ZERO,
        }
    }

    fn then_wait(command: VmCommand, delay_after: Duration) -> Self {
        Self {
            command,
            delay_after,
        }
    }
}

/// Ordered commands for one step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayPlan {
    commands: VecDeque<TimedCommand>,
    unresolved_vars: usize,
}

impl ReplayPlan {
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn commands(&self) -> impl Iterator<Item = &TimedCommand> {
        self.commands.iter()
    }

    /// `var` lines dropped because no value was bound
    pub fn unresolved_vars(&self) -> usize {
        self.unresolved_vars
    }

    /// Sum of all settle delays
    pub fn total_delay(&self) -> Duration {
        self.commands.iter().map(|c| c.delay_after).sum()
    }
}

/// Counters for one replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub executed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl ReplayReport {
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReplayEngine {
    timing: ReplayTiming,
}

impl ReplayEngine {
    pub fn new(timing: ReplayTiming) -> Self {
        Self { timing }
    }

    pub fn timing(&self) -> &ReplayTiming {
        &self.timing
    }

    /// Expand `lines` into commands, in capture order.
    pub fn plan(&self, lines: &[ActionLine], vars: &VariableStore) -> ReplayPlan {
        let mut plan = ReplayPlan::default();
        let (sentinel_x, sentinel_y) = self.timing.sentinel;

        for line in lines {
            match line {
                ActionLine::Key(name) => {
                    plan.commands.push_back(TimedCommand::now(VmCommand::SendKey(name.clone())));
                }
                ActionLine::Var(name) => match vars.get(name) {
                    Some(value) if !value.is_empty() => {
                        plan.commands
                            .push_back(TimedCommand::now(VmCommand::SendString(value.to_string())));
                    }
                    _ => {
                        debug!("Variable '{}' has no value, not typing it", name);
                        plan.unresolved_vars += 1;
                    }
                },
                ActionLine::MouseMove { x, y } => {
                    plan.commands.push_back(TimedCommand::then_wait(
                        VmCommand::MouseMove {
                            x: sentinel_x,
                            y: sentinel_y,
                        },
                        self.timing.mouse_settle,
                    ));
                    plan.commands.push_back(TimedCommand::then_wait(
                        VmCommand::MouseMove { x: *x, y: *y },
                        self.timing.mouse_settle,
                    ));
                }
                ActionLine::MouseClick(button) => {
                    plan.commands.push_back(TimedCommand::then_wait(
                        VmCommand::MouseButton(*button),
                        self.timing.click_release,
                    ));
                    plan.commands
                        .push_back(TimedCommand::now(VmCommand::MouseButton(RELEASE_ALL_BUTTONS)));
                }
                ActionLine::Passthrough(_) | ActionLine::Blank => {}
            }
        }

        plan
    }

    /// Run `plan` to completion on the calling thread, sleeping between commands.
    pub fn run_blocking(&self, plan: ReplayPlan, vm: &mut dyn VmControl) -> ReplayReport {
        let mut active = ActiveReplay::new(plan);
        loop {
            match active.step(vm) {
                ReplayProgress::Continue(delay) => {
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                }
                ReplayProgress::Finished(report) => return report,
            }
        }
    }
}

/// What the loop should do after one replay step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayProgress {
    /// Call `step` again after this delay
    Continue(Duration),
    /// Plan exhausted
    Finished(ReplayReport),
}

/// A plan being executed one command at a time.
#[derive(Debug, Clone)]
pub struct ActiveReplay {
    plan: ReplayPlan,
    report: ReplayReport,
}

impl ActiveReplay {
    pub fn new(plan: ReplayPlan) -> Self {
        let report = ReplayReport {
            skipped: plan.unresolved_vars,
            ..ReplayReport::default()
        };
        Self { plan, report }
    }

    pub fn remaining(&self) -> usize {
        self.plan.len()
    }

    /// Execute the next command, or report completion if none is left.
    pub fn step(&mut self, vm: &mut dyn VmControl) -> ReplayProgress {
        let Some(next) = self.plan.commands.pop_front() else {
            return ReplayProgress::Finished(self.report);
        };

        debug!("Replay: {}", next.command);
        match next.command.apply(vm) {
            Ok(()) => self.report.executed += 1,
            Err(e) => {
                warn!("Replay command '{}' failed: {}", next.command, e);
                self.report.failed += 1;
            }
        }
        ReplayProgress::Continue(next.delay_after)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm_control::{DryRunVm, VmError};
    use std::path::Path;

    fn store(pairs: &[(&str, &str)]) -> VariableStore {
        let mut vars = VariableStore::new();
        vars.commit(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        vars
    }

    fn commands(plan: &ReplayPlan) -> Vec<VmCommand> {
        plan.commands().map(|c| c.command.clone()).collect()
    }

    #[test]
    fn test_plan_preserves_capture_order() {
        let engine = ReplayEngine::default();
        let lines = vec![
            ActionLine::Key("A".into()),
            ActionLine::Var("x".into()),
            ActionLine::MouseClick(1),
        ];
        let plan = engine.plan(&lines, &store(&[("x", "hello")]));

        assert_eq!(
            commands(&plan),
            vec![
                VmCommand::SendKey("A".into()),
                VmCommand::SendString("hello".into()),
                VmCommand::MouseButton(1),
                VmCommand::MouseButton(0),
            ]
        );
    }

    #[test]
    fn test_mousemove_goes_through_sentinel() {
        let engine = ReplayEngine::default();
        let plan = engine.plan(&[ActionLine::MouseMove { x: 100, y: 200 }], &VariableStore::new());
        let timed: Vec<&TimedCommand> = plan.commands().collect();

        assert_eq!(timed.len(), 2);
        assert_eq!(timed[0].command, VmCommand::MouseMove { x: -8000, y: -8000 });
        assert_eq!(timed[0].delay_after, Duration::from_millis(500));
        assert_eq!(timed[1].command, VmCommand::MouseMove { x: 100, y: 200 });
        assert_eq!(timed[1].delay_after, Duration::from_millis(500));
    }

    #[test]
    fn test_click_waits_before_release() {
        let engine = ReplayEngine::default();
        let plan = engine.plan(&[ActionLine::MouseClick(2)], &VariableStore::new());
        let timed: Vec<&TimedCommand> = plan.commands().collect();
        assert_eq!(timed[0].delay_after, Duration::from_millis(100));
        assert_eq!(timed[1].command, VmCommand::MouseButton(RELEASE_ALL_BUTTONS));
    }

    #[test]
    fn test_unbound_and_empty_vars_are_skipped() {
        let engine = ReplayEngine::default();
        let lines = vec![ActionLine::Var("missing".into()), ActionLine::Var("empty".into())];
        let plan = engine.plan(&lines, &store(&[("empty", "")]));
        assert!(plan.is_empty());
        assert_eq!(plan.unresolved_vars(), 2);
    }

    #[test]
    fn test_passthrough_lines_produce_nothing() {
        let engine = ReplayEngine::default();
        let lines = vec![
            ActionLine::Passthrough("sleep 3".into()),
            ActionLine::Blank,
        ];
        assert!(engine.plan(&lines, &VariableStore::new()).is_empty());
    }

    /// Fails every call to `send_key`.
    struct BrokenKeyboard;

    impl VmControl for BrokenKeyboard {
        fn is_alive(&mut self) -> bool {
            true
        }
        fn pause(&mut self) -> Result<(), VmError> {
            Ok(())
        }
        fn resume(&mut self) -> Result<(), VmError> {
            Ok(())
        }
        fn send_key(&mut self, _name: &str) -> Result<(), VmError> {
            Err(VmError::Channel("keyboard unplugged".into()))
        }
        fn send_string(&mut self, _text: &str) -> Result<(), VmError> {
            Ok(())
        }
        fn screendump(&mut self, _path: &Path) -> Result<(), VmError> {
            Ok(())
        }
        fn mouse_move(&mut self, _x: i32, _y: i32) -> Result<(), VmError> {
            Ok(())
        }
        fn mouse_button(&mut self, _button: u8) -> Result<(), VmError> {
            Ok(())
        }
    }

    #[test]
    fn test_failures_do_not_stop_replay() {
        let engine = ReplayEngine::default();
        let lines = vec![
            ActionLine::Key("a".into()),
            ActionLine::Var("x".into()),
            ActionLine::Key("b".into()),
        ];
        let plan = engine.plan(&lines, &store(&[("x", "typed")]));
        let report = engine.run_blocking(plan, &mut BrokenKeyboard);

        assert_eq!(report.failed, 2);
        assert_eq!(report.executed, 1);
        assert!(!report.is_clean());
    }

    #[test]
    fn test_active_replay_reports_delays() {
        let engine = ReplayEngine::new(ReplayTiming {
            mouse_settle: Duration::from_millis(7),
            ..ReplayTiming::default()
        });
        let plan = engine.plan(&[ActionLine::MouseMove { x: 1, y: 1 }], &VariableStore::new());
        let mut active = ActiveReplay::new(plan);
        let mut vm = DryRunVm::new();

        assert_eq!(active.step(&mut vm), ReplayProgress::Continue(Duration::from_millis(7)));
        assert_eq!(active.step(&mut vm), ReplayProgress::Continue(Duration::from_millis(7)));
        assert_eq!(
            active.step(&mut vm),
            ReplayProgress::Finished(ReplayReport {
                executed: 2,
                failed: 0,
                skipped: 0
            })
        );
    }
}
