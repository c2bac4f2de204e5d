//! Line-oriented console frontend.
//!
//! Stdin is read on a dedicated thread and forwarded over a channel, so the
//! session loop can wait for input and for its next timer at the same time.
//! Lines starting with `:` are commands; anything else typed in Step mode
//! becomes a line of the current step.

use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{Result, StepMakerError};
use crate::frontend::{EditingSurface, FrameDisplay, TimingHints};
use crate::mode_state::{DoneOutcome, StepMaker};
use crate::variables::Prompter;

/// Longest the loop sleeps waiting for input before polling timers again
pub const MAX_IDLE_WAIT: Duration = Duration::from_millis(100);

/// One event from the input thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    Line(String),
    Eof,
}

/// Spawn a thread forwarding every line of `reader` as an `InputEvent`.
///
/// The thread sends `Eof` and exits when the reader is exhausted, fails, or
/// the receiver is dropped.
pub fn spawn_line_reader<R>(reader: R) -> Receiver<InputEvent>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        debug!("Console input thread started");
        for line in reader.lines() {
            match line {
                Ok(line) => {
                    if tx.send(InputEvent::Line(line)).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    warn!("Failed to read console input: {}", e);
                    break;
                }
            }
        }
        let _ = tx.send(InputEvent::Eof);
        debug!("Console input thread finished");
    });
    rx
}

/// A parsed console line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Break,
    Done,
    Show,
    Clear,
    Undo,
    Status,
    Help,
    Quit,
    Unknown(String),
    /// A line of step text
    Text(String),
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        let Some(command) = trimmed.strip_prefix(':') else {
            return Self::Text(line.trim_end().to_string());
        };
        match command {
            "break" | "b" => Self::Break,
            "done" | "d" => Self::Done,
            "show" => Self::Show,
            "clear" => Self::Clear,
            "undo" => Self::Undo,
            "status" => Self::Status,
            "help" | "h" | "?" => Self::Help,
            "quit" | "q" => Self::Quit,
            other => Self::Unknown(other.to_string()),
        }
    }
}

const HELP_TEXT: &str = "\
Commands:
  :break   pause the VM and start a new step
  :done    commit the current step, resume the VM and replay it
  :show    print the lines of the current step
  :undo    remove the last line of the current step
  :clear   remove every line of the current step
  :status  print the current step and recorded time
  :quit    close the step file and exit
While a step is open, any other line is added to it, e.g.
  key ctrl-alt-f2
  var root_password
  mousemove 120 340
  mouseclick 1";

/// Cancels a variable prompt
const CANCEL_PROMPT: &str = ":cancel";

/// Editing surface fed from the console input channel.
pub struct ConsoleSurface {
    input: Receiver<InputEvent>,
    out: Box<dyn Write>,
    lines: Vec<String>,
    editing: bool,
    stop: Arc<AtomicBool>,
}

impl ConsoleSurface {
    pub fn new(input: Receiver<InputEvent>, out: Box<dyn Write>) -> Self {
        Self {
            input,
            out,
            lines: Vec::new(),
            editing: false,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Abandon variable prompts once `stop` is raised
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    pub fn is_editing(&self) -> bool {
        self.editing
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Add a line to the open step. Ignored outside of editing.
    pub fn push_line(&mut self, line: String) -> bool {
        if !self.editing {
            return false;
        }
        self.lines.push(line);
        true
    }

    pub fn undo(&mut self) -> Option<String> {
        self.lines.pop()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    /// The open step was committed; editing is disabled until the next break.
    pub fn finish_step(&mut self) {
        self.lines.clear();
        self.editing = false;
    }

    /// Wait up to `timeout` for the next input event. `None` on timeout.
    pub fn next_event(&mut self, timeout: Duration) -> Option<InputEvent> {
        match self.input.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(InputEvent::Eof),
        }
    }

    pub fn say(&mut self, message: &str) {
        if let Err(e) = writeln!(self.out, "{}", message).and_then(|_| self.out.flush()) {
            debug!("Console write failed: {}", e);
        }
    }
}

impl Prompter for ConsoleSurface {
    fn prompt_variable(&mut self, name: &str) -> Option<String> {
        self.say(&format!(
            "Value for variable '{}' ({} to abort the commit):",
            name, CANCEL_PROMPT
        ));
        loop {
            if self.stop.load(Ordering::Relaxed) {
                info!("Stop requested, abandoning prompt for '{}'", name);
                return None;
            }
            match self.input.recv_timeout(MAX_IDLE_WAIT) {
                Ok(InputEvent::Line(line)) if line.trim() == CANCEL_PROMPT => return None,
                Ok(InputEvent::Line(line)) => return Some(line),
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(InputEvent::Eof) | Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }
}

impl EditingSurface for ConsoleSurface {
    fn begin_step(&mut self, ordinal: u32, run_time_secs: f64, hints: &TimingHints) {
        self.lines.clear();
        self.editing = true;
        self.say(&format!(
            "Step {} at recorded time {:.2}. Suggested: sleep {} / barrier timeout {}.",
            ordinal,
            run_time_secs,
            hints.rounded_sleep(),
            hints.rounded_barrier_timeout()
        ));
    }

    fn step_lines(&mut self) -> Option<String> {
        if self.lines.is_empty() {
            return None;
        }
        let mut text = self.lines.join("\n");
        text.push('\n');
        Some(text)
    }
}

/// Prints status changes and notes new frames.
pub struct ConsoleDisplay {
    out: Box<dyn Write>,
    last_status: String,
    frames: u64,
}

impl ConsoleDisplay {
    pub fn new(out: Box<dyn Write>) -> Self {
        Self {
            out,
            last_status: String::new(),
            frames: 0,
        }
    }

    pub fn frames_shown(&self) -> u64 {
        self.frames
    }
}

impl FrameDisplay for ConsoleDisplay {
    fn show_frame(&mut self, path: &Path) {
        self.frames += 1;
        debug!("Frame {} ready at {}", self.frames, path.display());
    }

    fn set_status(&mut self, label: &str) {
        if label == self.last_status {
            return;
        }
        self.last_status = label.to_string();
        if let Err(e) = writeln!(self.out, "[{}]", label).and_then(|_| self.out.flush()) {
            debug!("Console write failed: {}", e);
        }
    }
}

/// Drive `session` from console input until `:quit`, end of input or `stop`.
///
/// Refused intents are reported to the operator and the loop keeps going.
/// Only unrecoverable errors, such as I/O on the step or vars file, end the
/// session early. The
/// session is shut down before returning either way.
pub fn run_console(
    session: &mut StepMaker,
    surface: &mut ConsoleSurface,
    stop: &AtomicBool,
) -> Result<()> {
    surface.say("Step Maker ready. Type :help for commands.");
    let outcome = console_loop(session, surface, stop);
    let closed = session.shutdown();
    outcome.and(closed)
}

fn console_loop(
    session: &mut StepMaker,
    surface: &mut ConsoleSurface,
    stop: &AtomicBool,
) -> Result<()> {
    loop {
        if stop.load(Ordering::Relaxed) {
            info!("Stop requested, closing session");
            return Ok(());
        }
        session.poll();

        let wait = session
            .time_until_next_task()
            .map_or(MAX_IDLE_WAIT, |until| until.min(MAX_IDLE_WAIT));
        let line = match surface.next_event(wait) {
            None => continue,
            Some(InputEvent::Eof) => {
                info!("Console input closed");
                return Ok(());
            }
            Some(InputEvent::Line(line)) => line,
        };

        match ConsoleCommand::parse(&line) {
            ConsoleCommand::Quit => return Ok(()),
            ConsoleCommand::Break => match session.request_break(surface) {
                Ok(_) => {}
                Err(e) => report(surface, "break", e)?,
            },
            ConsoleCommand::Done => match session.request_done(surface) {
                Ok(DoneOutcome::Committed { ordinal, .. }) => {
                    surface.finish_step();
                    surface.say(&format!("Step {} recorded, replaying.", ordinal));
                }
                Ok(DoneOutcome::NothingToDo) => surface.say("Nothing to commit."),
                Err(e) => report(surface, "done", e)?,
            },
            ConsoleCommand::Show => {
                let text = if surface.lines().is_empty() {
                    "(empty step)".to_string()
                } else {
                    surface.lines().join("\n")
                };
                surface.say(&text);
            }
            ConsoleCommand::Clear => surface.clear(),
            ConsoleCommand::Undo => {
                if let Some(line) = surface.undo() {
                    surface.say(&format!("Removed: {}", line));
                }
            }
            ConsoleCommand::Status => {
                let label = session.status_label();
                surface.say(&label);
            }
            ConsoleCommand::Help => surface.say(HELP_TEXT),
            ConsoleCommand::Unknown(command) => {
                surface.say(&format!("Unknown command ':{}'. Type :help.", command));
            }
            ConsoleCommand::Text(text) => {
                if !session.mode().editing_enabled() || !surface.push_line(text) {
                    surface.say("Not in step mode. Type :break to start a step.");
                }
            }
        }
    }
}

/// Tell the operator why an intent failed. Anything that is not
/// recoverable (file errors) is passed up.
fn report(surface: &mut ConsoleSurface, intent: &str, err: StepMakerError) -> Result<()> {
    if !err.is_recoverable() {
        return Err(err);
    }
    warn!("'{}' refused: {}", intent, err);
    surface.say(&format!("Cannot {}: {}", intent, err));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::io::Cursor;
    use std::rc::Rc;
    use std::sync::mpsc::Sender;

    /// Writer whose contents stay readable after being boxed
    #[derive(Clone, Default)]
    struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

    impl SharedBuffer {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.borrow()).to_string()
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn surface() -> (Sender<InputEvent>, ConsoleSurface, SharedBuffer) {
        let (tx, rx) = mpsc::channel();
        let out = SharedBuffer::default();
        (tx, ConsoleSurface::new(rx, Box::new(out.clone())), out)
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(ConsoleCommand::parse(":break"), ConsoleCommand::Break);
        assert_eq!(ConsoleCommand::parse("  :d "), ConsoleCommand::Done);
        assert_eq!(ConsoleCommand::parse(":q"), ConsoleCommand::Quit);
        assert_eq!(
            ConsoleCommand::parse(":frobnicate"),
            ConsoleCommand::Unknown("frobnicate".to_string())
        );
        assert_eq!(
            ConsoleCommand::parse("key ret  "),
            ConsoleCommand::Text("key ret".to_string())
        );
    }

    #[test]
    fn test_line_reader_forwards_lines_then_eof() {
        let rx = spawn_line_reader(Cursor::new("one\ntwo\n"));
        assert_eq!(rx.recv().unwrap(), InputEvent::Line("one".to_string()));
        assert_eq!(rx.recv().unwrap(), InputEvent::Line("two".to_string()));
        assert_eq!(rx.recv().unwrap(), InputEvent::Eof);
    }

    #[test]
    fn test_surface_collects_lines_only_while_editing() {
        let (_tx, mut surface, out) = surface();
        assert!(!surface.push_line("key ret".to_string()));
        assert_eq!(surface.step_lines(), None);

        surface.begin_step(3, 12.5, &TimingHints::from_idle(Duration::from_secs(2)));
        assert!(out.text().contains("Step 3 at recorded time 12.50"));
        assert!(out.text().contains("sleep 2 / barrier timeout 10"));

        assert!(surface.push_line("key ret".to_string()));
        assert!(surface.push_line("var user".to_string()));
        assert_eq!(surface.undo(), Some("var user".to_string()));
        assert_eq!(surface.step_lines(), Some("key ret\n".to_string()));

        surface.finish_step();
        assert!(!surface.is_editing());
        assert_eq!(surface.step_lines(), None);
    }

    #[test]
    fn test_prompt_reads_next_line_and_honours_cancel() {
        let (tx, mut surface, out) = surface();
        tx.send(InputEvent::Line("hunter2".to_string())).unwrap();
        tx.send(InputEvent::Line(":cancel".to_string())).unwrap();

        assert_eq!(surface.prompt_variable("password"), Some("hunter2".to_string()));
        assert_eq!(surface.prompt_variable("password"), None);
        assert!(out.text().contains("Value for variable 'password'"));

        drop(tx);
        assert_eq!(surface.prompt_variable("user"), None);
    }

    #[test]
    fn test_prompt_gives_up_when_stop_is_raised() {
        let (_tx, surface, _out) = surface();
        let stop = Arc::new(AtomicBool::new(false));
        let mut surface = surface.with_stop_flag(Arc::clone(&stop));

        let raiser = std::thread::spawn({
            let stop = Arc::clone(&stop);
            move || {
                std::thread::sleep(Duration::from_millis(150));
                stop.store(true, Ordering::Relaxed);
            }
        });
        assert_eq!(surface.prompt_variable("password"), None);
        raiser.join().unwrap();
    }

    #[test]
    fn test_display_prints_only_status_changes() {
        let out = SharedBuffer::default();
        let mut display = ConsoleDisplay::new(Box::new(out.clone()));
        display.set_status("Step Maker -- step 1 at time 0.00");
        display.set_status("Step Maker -- step 1 at time 0.00");
        display.show_frame(Path::new("/tmp/scrdump.ppm"));

        assert_eq!(out.text().lines().count(), 1);
        assert_eq!(display.frames_shown(), 1);
    }
}
