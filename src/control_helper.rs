//! VM control through an external helper program.
//!
//! How the VM is actually reached (a QEMU monitor socket, libvirt, a test
//! harness) is up to the operator. The recorder only runs
//! `<helper> <verb> [args...]` for every call and reads the exit status:
//! zero is success, anything else is a failure with stderr as the reason.
//!
//! Arguments are typed per verb through `ControlArgs`, so the verb table
//! cannot drift between the caller and the command line it produces.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{Context, Result};
use tracing::debug;

use crate::process_guard::{CommandProcessGroup, HelperRegistry};
use crate::types::MouseButton;
use crate::vm_control::{VmControl, VmError};

/// Environment variable carrying typed text, kept off the command line
pub const TEXT_ENV_VAR: &str = "STEPMAKER_TEXT";

/// Typed arguments for one helper invocation.
///
/// # Contract
///
/// - `to_cli_args()` starts with the verb and contains nothing secret.
/// - `get_env_vars()` carries anything that must not show up in `ps`.
pub trait ControlArgs {
    fn verb(&self) -> &'static str;
    fn to_cli_args(&self) -> Vec<String>;
    fn get_env_vars(&self) -> Vec<(String, String)> {
        Vec::new()
    }
}

/// Every request the recorder sends to the helper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HelperRequest<'a> {
    IsAlive,
    Pause,
    Resume,
    SendKey(&'a str),
    SendString(&'a str),
    Screendump(&'a Path),
    MouseMove { x: i32, y: i32 },
    MouseButton(MouseButton),
}

impl ControlArgs for HelperRequest<'_> {
    fn verb(&self) -> &'static str {
        match self {
            Self::IsAlive => "is-alive",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::SendKey(_) => "sendkey",
            Self::SendString(_) => "sendstring",
            Self::Screendump(_) => "screendump",
            Self::MouseMove { .. } => "mouse_move",
            Self::MouseButton(_) => "mouse_button",
        }
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = vec![self.verb().to_string()];
        match self {
            Self::IsAlive | Self::Pause | Self::Resume | Self::SendString(_) => {}
            Self::SendKey(name) => args.push(name.to_string()),
            Self::Screendump(path) => args.push(path.display().to_string()),
            Self::MouseMove { x, y } => {
                args.push(x.to_string());
                args.push(y.to_string());
            }
            Self::MouseButton(button) => args.push(button.to_string()),
        }
        args
    }

    fn get_env_vars(&self) -> Vec<(String, String)> {
        match self {
            Self::SendString(text) => vec![(TEXT_ENV_VAR.to_string(), text.to_string())],
            _ => Vec::new(),
        }
    }
}

/// Output from one helper run.
#[derive(Debug, Clone)]
pub struct HelperOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub success: bool,
}

/// Run `program` with `leading_args`, then the typed arguments, in its own
/// process group.
///
/// The child is registered with `HelperRegistry::global()` while it runs.
/// A non-zero exit is not an error here; inspect `success`.
pub fn run_helper<T: ControlArgs>(
    program: &Path,
    leading_args: &[String],
    args: &T,
) -> Result<HelperOutput> {
    let cli_args = args.to_cli_args();
    debug!("helper: {} {:?} {:?}", program.display(), leading_args, cli_args);

    let mut cmd = Command::new(program);
    cmd.args(leading_args)
        .args(&cli_args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .in_new_process_group();
    for (key, value) in args.get_env_vars() {
        cmd.env(key, value);
    }

    let child = cmd
        .spawn()
        .with_context(|| format!("Failed to spawn control helper {}", program.display()))?;
    let pid = child.id();
    if let Ok(mut registry) = HelperRegistry::global().lock() {
        registry.register(pid, args.verb());
    }

    let output = child.wait_with_output();

    if let Ok(mut registry) = HelperRegistry::global().lock() {
        registry.unregister(pid);
    }
    let output =
        output.with_context(|| format!("Failed waiting for control helper '{}'", args.verb()))?;

    Ok(HelperOutput {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        exit_code: output.status.code(),
        success: output.status.success(),
    })
}

/// `VmControl` backed by an external helper program.
#[derive(Debug, Clone)]
pub struct HelperVm {
    program: PathBuf,
    leading_args: Vec<String>,
}

impl HelperVm {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self::with_args(program, Vec::new())
    }

    /// `leading_args` go before the verb on every call, e.g. a domain name
    pub fn with_args(program: impl Into<PathBuf>, leading_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            leading_args,
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn call(&self, request: HelperRequest<'_>) -> Result<(), VmError> {
        let verb = request.verb();
        let output = run_helper(&self.program, &self.leading_args, &request)
            .map_err(|e| VmError::Channel(format!("{:#}", e)))?;
        if output.success {
            return Ok(());
        }

        let reason = match output.stderr.trim() {
            "" => format!("exit code {}", output.exit_code.unwrap_or(-1)),
            stderr => stderr.to_string(),
        };
        match request {
            HelperRequest::Screendump(_) => Err(VmError::Unavailable(reason)),
            _ => Err(VmError::CommandFailed { verb, reason }),
        }
    }
}

impl VmControl for HelperVm {
    fn is_alive(&mut self) -> bool {
        match self.call(HelperRequest::IsAlive) {
            Ok(()) => true,
            Err(e) => {
                debug!("Liveness check failed: {}", e);
                false
            }
        }
    }

    fn pause(&mut self) -> Result<(), VmError> {
        self.call(HelperRequest::Pause)
    }

    fn resume(&mut self) -> Result<(), VmError> {
        self.call(HelperRequest::Resume)
    }

    fn send_key(&mut self, name: &str) -> Result<(), VmError> {
        self.call(HelperRequest::SendKey(name))
    }

    fn send_string(&mut self, text: &str) -> Result<(), VmError> {
        self.call(HelperRequest::SendString(text))
    }

    fn screendump(&mut self, path: &Path) -> Result<(), VmError> {
        self.call(HelperRequest::Screendump(path))
    }

    fn mouse_move(&mut self, x: i32, y: i32) -> Result<(), VmError> {
        self.call(HelperRequest::MouseMove { x, y })
    }

    fn mouse_button(&mut self, button: MouseButton) -> Result<(), VmError> {
        self.call(HelperRequest::MouseButton(button))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_args_per_verb() {
        assert_eq!(HelperRequest::IsAlive.to_cli_args(), vec!["is-alive"]);
        assert_eq!(HelperRequest::SendKey("ret").to_cli_args(), vec!["sendkey", "ret"]);
        assert_eq!(
            HelperRequest::MouseMove { x: -8000, y: 5 }.to_cli_args(),
            vec!["mouse_move", "-8000", "5"]
        );
        assert_eq!(HelperRequest::MouseButton(0).to_cli_args(), vec!["mouse_button", "0"]);
    }

    #[test]
    fn test_typed_text_stays_off_command_line() {
        let request = HelperRequest::SendString("s3cret");
        assert_eq!(request.to_cli_args(), vec!["sendstring"]);
        assert_eq!(
            request.get_env_vars(),
            vec![(TEXT_ENV_VAR.to_string(), "s3cret".to_string())]
        );
    }

    /// Write a shell script; it runs as `sh <script> <verb> ...`
    fn write_helper(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("helper.sh");
        std::fs::write(&path, format!("{}\n", body)).unwrap();
        path
    }

    #[test]
    fn test_helper_vm_maps_exit_status() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("calls.log");
        let helper = write_helper(
            dir.path(),
            &format!(
                "echo \"$@ $STEPMAKER_TEXT\" >> {log}\n\
                 case \"$1\" in\n\
                   pause) echo 'monitor busy' >&2; exit 3 ;;\n\
                   screendump) exit 1 ;;\n\
                 esac\n\
                 exit 0",
                log = log.display()
            ),
        );
        let mut vm = HelperVm::with_args("sh", vec![helper.display().to_string()]);

        assert!(vm.is_alive());
        assert!(vm.send_string("typed").is_ok());
        assert_eq!(
            vm.pause(),
            Err(VmError::CommandFailed {
                verb: "pause",
                reason: "monitor busy".to_string()
            })
        );
        assert!(matches!(
            vm.screendump(Path::new("/tmp/x.ppm")),
            Err(VmError::Unavailable(_))
        ));

        let calls = std::fs::read_to_string(&log).unwrap();
        assert!(calls.contains("sendstring typed"));
    }

    #[test]
    fn test_missing_helper_is_channel_error() {
        let mut vm = HelperVm::new("/nonexistent/stepmaker-helper");
        assert!(!vm.is_alive());
        assert!(matches!(vm.resume(), Err(VmError::Channel(_))));
    }
}
