//! Append-only persistence for the step file and the vars file.
//!
//! Both files are created when the session starts, receive their header
//! immediately and are only ever appended to afterwards. Every write is
//! flushed before the call returns so a crash loses at most the step being
//! committed.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Result, StepMakerError};
use crate::step_codec::{self, StepRecord};

/// Name of the vars file inside the data directory
pub const VARS_FILE_NAME: &str = "vars";

/// Identity lines written into the step file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub generated_on: String,
    pub host_identity: String,
}

impl FileHeader {
    /// Header for a file generated now on this host
    pub fn current() -> Self {
        Self {
            generated_on: chrono::Local::now()
                .format("%a %b %e %H:%M:%S %Y")
                .to_string(),
            host_identity: host_identity(),
        }
    }
}

/// `uname -a`-style identity of the local host
pub fn host_identity() -> String {
    match nix::sys::utsname::uname() {
        Ok(uts) => format!(
            "{} {} {} {} {}",
            uts.sysname().to_string_lossy(),
            uts.nodename().to_string_lossy(),
            uts.release().to_string_lossy(),
            uts.version().to_string_lossy(),
            uts.machine().to_string_lossy()
        ),
        Err(e) => {
            debug!("uname failed: {}", e);
            "unknown".to_string()
        }
    }
}

/// Default data directory for a step file:
/// `<dir>/../steps_data/<name>_data`
pub fn data_dir_for(steps_path: &Path) -> PathBuf {
    let parent = steps_path.parent().unwrap_or_else(|| Path::new(""));
    let name = steps_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    parent
        .join("..")
        .join("steps_data")
        .join(format!("{}_data", name))
}

/// Open handles on the two session artifacts.
#[derive(Debug)]
pub struct StepFiles {
    steps_path: PathBuf,
    vars_path: PathBuf,
    steps: Option<BufWriter<File>>,
    vars: Option<BufWriter<File>>,
}

impl StepFiles {
    /// Create both files and write their headers.
    ///
    /// The step file must not exist yet; the vars file is truncated.
    pub fn create(steps_path: &Path, data_dir: &Path, header: &FileHeader) -> Result<Self> {
        fs::create_dir_all(data_dir)?;

        let steps = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(steps_path)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    StepMakerError::precondition(format!(
                        "Steps file {} already exists",
                        steps_path.display()
                    ))
                } else {
                    StepMakerError::Io(e)
                }
            })?;
        let vars_path = data_dir.join(VARS_FILE_NAME);
        let vars = File::create(&vars_path)?;

        let mut files = Self {
            steps_path: steps_path.to_path_buf(),
            vars_path,
            steps: Some(BufWriter::new(steps)),
            vars: Some(BufWriter::new(vars)),
        };

        let step_header = step_codec::step_file_header(&header.generated_on, &header.host_identity);
        files.write_steps(step_header.as_bytes())?;
        files.write_vars(format!("{}\n", step_codec::VARS_FILE_HEADER).as_bytes())?;

        info!(
            "Recording to {} (vars in {})",
            files.steps_path.display(),
            files.vars_path.display()
        );
        Ok(files)
    }

    pub fn steps_path(&self) -> &Path {
        &self.steps_path
    }

    pub fn vars_path(&self) -> &Path {
        &self.vars_path
    }

    pub fn is_closed(&self) -> bool {
        self.steps.is_none() && self.vars.is_none()
    }

    /// Append one `name=value` line per binding. No-op for an empty slice.
    pub fn append_vars(&mut self, bindings: &[(String, String)]) -> Result<()> {
        if bindings.is_empty() {
            return Ok(());
        }
        let mut text = String::new();
        for (name, value) in bindings {
            text.push_str(&step_codec::encode_var(name, value));
        }
        self.write_vars(text.as_bytes())
    }

    /// Append the delimiter and the step's lines.
    pub fn append_step(&mut self, record: &StepRecord) -> Result<()> {
        self.write_steps(record.encode_block().as_bytes())
    }

    /// Flush and close both files. Safe to call more than once.
    pub fn close(&mut self) -> Result<()> {
        if let Some(mut steps) = self.steps.take() {
            steps.flush()?;
        }
        if let Some(mut vars) = self.vars.take() {
            vars.flush()?;
        }
        Ok(())
    }

    fn write_steps(&mut self, bytes: &[u8]) -> Result<()> {
        let writer = self
            .steps
            .as_mut()
            .ok_or_else(|| closed_error(&self.steps_path))?;
        writer.write_all(bytes)?;
        writer.flush()?;
        Ok(())
    }

    fn write_vars(&mut self, bytes: &[u8]) -> Result<()> {
        let writer = self
            .vars
            .as_mut()
            .ok_or_else(|| closed_error(&self.vars_path))?;
        writer.write_all(bytes)?;
        writer.flush()?;
        Ok(())
    }
}

fn closed_error(path: &Path) -> StepMakerError {
    StepMakerError::Io(std::io::Error::other(format!(
        "{} is already closed",
        path.display()
    )))
}

impl Drop for StepFiles {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> FileHeader {
        FileHeader {
            generated_on: "Mon Oct 19 10:00:00 2026".to_string(),
            host_identity: "Linux testhost".to_string(),
        }
    }

    #[test]
    fn test_data_dir_layout() {
        assert_eq!(
            data_dir_for(Path::new("/tests/steps/install.steps")),
            PathBuf::from("/tests/steps/../steps_data/install.steps_data")
        );
    }

    #[test]
    fn test_create_writes_headers() {
        let dir = tempfile::tempdir().unwrap();
        let steps = dir.path().join("a.steps");
        let data = dir.path().join("data");
        let files = StepFiles::create(&steps, &data, &header()).unwrap();

        let content = fs::read_to_string(files.steps_path()).unwrap();
        assert!(content.starts_with("# Generated by Step Maker\n"));
        assert!(content.contains("# uname -a: Linux testhost\n"));

        let vars = fs::read_to_string(data.join(VARS_FILE_NAME)).unwrap();
        assert_eq!(vars, format!("{}\n", step_codec::VARS_FILE_HEADER));
    }

    #[test]
    fn test_create_refuses_existing_step_file() {
        let dir = tempfile::tempdir().unwrap();
        let steps = dir.path().join("a.steps");
        fs::write(&steps, "keep me").unwrap();

        let err = StepFiles::create(&steps, dir.path(), &header()).unwrap_err();
        assert!(matches!(err, StepMakerError::Precondition(_)));
        assert_eq!(fs::read_to_string(&steps).unwrap(), "keep me");
    }

    #[test]
    fn test_appends_are_visible_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let steps = dir.path().join("a.steps");
        let mut files = StepFiles::create(&steps, dir.path(), &header()).unwrap();

        files
            .append_vars(&[("x".to_string(), "hello".to_string())])
            .unwrap();
        let record = StepRecord::decode(1, 0.0, "key ret\n").unwrap();
        files.append_step(&record).unwrap();

        let vars = fs::read_to_string(files.vars_path()).unwrap();
        assert!(vars.ends_with("x=hello\n"));
        let content = fs::read_to_string(&steps).unwrap();
        assert!(content.ends_with(&format!("{}\nkey ret\n", step_codec::STEP_DELIMITER)));
    }

    #[test]
    fn test_close_is_idempotent_and_blocks_writes() {
        let dir = tempfile::tempdir().unwrap();
        let mut files =
            StepFiles::create(&dir.path().join("a.steps"), dir.path(), &header()).unwrap();
        files.close().unwrap();
        files.close().unwrap();
        assert!(files.is_closed());
        assert!(files.append_vars(&[("a".into(), "b".into())]).is_err());
    }
}
