//! Lifecycle management for control helper processes
//!
//! Every VM command is executed by spawning the operator's control helper.
//! A helper that hangs (say, on a wedged monitor socket) must not outlive
//! the recorder, so helpers are spawned in their own process group, tracked
//! in a registry together with the verb they were asked to run, and
//! terminated when the recorder exits.
//!
//! The first SIGINT, SIGTERM or SIGHUP does not kill the recorder outright.
//! It stops any helper that is still running, which unblocks a call stuck on
//! a wedged helper, and raises a flag the console loop checks so the session
//! can close its files and resume the VM. A second signal exits at once.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use nix::libc;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::{debug, info, warn};

static HELPER_REGISTRY: OnceLock<Arc<Mutex<HelperRegistry>>> = OnceLock::new();

/// Grace period given to helpers on recorder exit
pub const HELPER_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// What `terminate_all` had to do
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Teardown {
    /// Helpers that exited after SIGTERM
    pub terminated: usize,
    /// Helpers that needed SIGKILL
    pub killed: usize,
}

/// In-flight helper processes, keyed by PID, with the verb each one runs
#[derive(Debug, Default)]
pub struct HelperRegistry {
    running: HashMap<u32, &'static str>,
    torn_down: bool,
}

impl HelperRegistry {
    /// Get or create the process-wide registry
    pub fn global() -> Arc<Mutex<HelperRegistry>> {
        HELPER_REGISTRY
            .get_or_init(|| Arc::new(Mutex::new(HelperRegistry::default())))
            .clone()
    }

    pub fn register(&mut self, pid: u32, verb: &'static str) {
        self.running.insert(pid, verb);
        debug!("helper {} started as PID {}", verb, pid);
    }

    pub fn unregister(&mut self, pid: u32) {
        if let Some(verb) = self.running.remove(&pid) {
            debug!("helper {} (PID {}) finished", verb, pid);
        }
    }

    pub fn count(&self) -> usize {
        self.running.len()
    }

    /// Verb of the helper running as `pid`, if it is tracked
    pub fn verb_of(&self, pid: u32) -> Option<&'static str> {
        self.running.get(&pid).copied()
    }

    /// Stop every helper for good. Only the first call does anything;
    /// helpers registered afterwards are left to finish on their own.
    pub fn terminate_all(&mut self, grace_period: Duration) -> Teardown {
        if self.torn_down {
            return Teardown::default();
        }
        self.torn_down = true;
        self.interrupt_running(grace_period)
    }

    /// SIGTERM every helper group running now, wait up to `grace_period`,
    /// then SIGKILL the stragglers. Helpers started later are unaffected.
    pub fn interrupt_running(&mut self, grace_period: Duration) -> Teardown {
        let helpers: Vec<(u32, &'static str)> = self.running.drain().collect();
        if helpers.is_empty() {
            return Teardown::default();
        }
        info!("Stopping {} control helper(s)", helpers.len());

        for &(pid, verb) in &helpers {
            debug!("SIGTERM to helper {} (PID {})", verb, pid);
            signal_helper(pid, Signal::SIGTERM);
        }

        let deadline = Instant::now() + grace_period;
        while Instant::now() < deadline {
            if helpers.iter().all(|&(pid, _)| !is_process_alive(pid)) {
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }

        let mut report = Teardown::default();
        for &(pid, verb) in &helpers {
            if is_process_alive(pid) {
                warn!("Helper {} (PID {}) ignored SIGTERM, killing it", verb, pid);
                signal_helper(pid, Signal::SIGKILL);
                report.killed += 1;
            } else {
                report.terminated += 1;
            }
        }
        report
    }
}

/// Signal the helper's whole process group, falling back to the PID alone
fn signal_helper(pid: u32, sig: Signal) {
    let raw = pid as i32;
    if signal::kill(Pid::from_raw(-raw), sig).is_err() {
        let _ = signal::kill(Pid::from_raw(raw), sig);
    }
}

/// Alive means: exists and is neither zombie nor dead
fn is_process_alive(pid: u32) -> bool {
    if signal::kill(Pid::from_raw(pid as i32), None).is_err() {
        return false;
    }
    let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) else {
        return true;
    };
    // The command name may contain spaces; the state follows the closing paren
    let state = stat
        .rsplit_once(')')
        .and_then(|(_, rest)| rest.split_whitespace().next());
    !matches!(state, Some("Z" | "X"))
}

/// RAII guard that stops every registered helper on drop.
/// Held by `main` for the lifetime of the session.
pub struct ProcessGuard {
    registry: Arc<Mutex<HelperRegistry>>,
}

impl ProcessGuard {
    pub fn new() -> Self {
        Self {
            registry: HelperRegistry::global(),
        }
    }

    pub fn helper_count(&self) -> usize {
        self.registry.lock().map(|r| r.count()).unwrap_or(0)
    }
}

impl Default for ProcessGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        if let Ok(mut registry) = self.registry.lock() {
            let report = registry.terminate_all(HELPER_GRACE_PERIOD);
            if report.killed > 0 {
                warn!("{} helper(s) had to be killed on exit", report.killed);
            }
        }
    }
}

/// Handle SIGINT, SIGTERM and SIGHUP.
///
/// The first signal raises the returned flag and interrupts running helpers
/// from a dedicated thread. Any signal received once the flag is up exits
/// the process with status 1.
pub fn init_signal_handlers() -> Result<Arc<AtomicBool>, std::io::Error> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::flag;
    use signal_hook::iterator::Signals;

    const STOP_SIGNALS: [i32; 3] = [SIGINT, SIGTERM, SIGHUP];

    let stop = Arc::new(AtomicBool::new(false));
    for sig in STOP_SIGNALS {
        // Checked before the flag is set, so only a repeated signal exits
        flag::register_conditional_shutdown(sig, 1, Arc::clone(&stop))?;
        flag::register(sig, Arc::clone(&stop))?;
    }

    let mut signals = Signals::new(STOP_SIGNALS)?;
    std::thread::spawn(move || {
        for sig in signals.forever() {
            let signal_name = match sig {
                SIGINT => "SIGINT",
                SIGTERM => "SIGTERM",
                SIGHUP => "SIGHUP",
                _ => "UNKNOWN",
            };
            info!("Received {}, stopping running helpers", signal_name);

            if let Ok(mut registry) = HelperRegistry::global().lock() {
                let report = registry.interrupt_running(HELPER_GRACE_PERIOD);
                if report.terminated + report.killed > 0 {
                    info!(
                        "Interrupted {} helper(s), {} killed",
                        report.terminated + report.killed,
                        report.killed
                    );
                }
            }
        }
    });

    Ok(stop)
}

/// Process-group setup for helper commands
pub trait CommandProcessGroup {
    /// Run the command as leader of a new process group that dies with us
    fn in_new_process_group(&mut self) -> &mut Self;
}

impl CommandProcessGroup for std::process::Command {
    fn in_new_process_group(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;
        // SAFETY: the closure only performs async-signal-safe syscalls
        unsafe {
            self.pre_exec(|| {
                nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0))
                    .map_err(std::io::Error::other)?;
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
        self
    }
}
