//! Step file text format.
//!
//! A step file is a header of `#` comment lines followed by step blocks. Each
//! block is the delimiter line `# ` + 32 dashes and then the lines the
//! operator authored for that step, verbatim. Only four keywords are acted
//! upon during replay (`key`, `var`, `mousemove`, `mouseclick`); every other
//! line is carried through untouched for the downstream player.
//!
//! A `var <name>` line has two roles: during commit it declares that the
//! step needs `<name>` resolved, during replay it types the resolved value.

use std::fmt;

use thiserror::Error;

use crate::types::{ActionKind, MouseButton};

/// Line separating two step blocks
pub const STEP_DELIMITER: &str = "# --------------------------------";

/// First line of every vars file
pub const VARS_FILE_HEADER: &str =
    "# This file lists the vars used during recording with Step Maker";

/// One decoded line of a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionLine {
    /// Press a single named key (`key ctrl-alt-delete`)
    Key(String),
    /// Declare and type a variable (`var username`)
    Var(String),
    /// Absolute pointer move (`mousemove 100 200`)
    MouseMove { x: i32, y: i32 },
    /// Click and release (`mouseclick 1`)
    MouseClick(MouseButton),
    /// Anything else the editing surface emits (`sleep 3`, `barrier_2 ...`, comments)
    Passthrough(String),
    Blank,
}

impl ActionLine {
    /// Name of the variable this line requires, if any
    pub fn declared_variable(&self) -> Option<&str> {
        match self {
            Self::Var(name) => Some(name),
            _ => None,
        }
    }

    /// Whether replay sends anything to the VM for this line
    pub fn is_action(&self) -> bool {
        match self {
            Self::Key(_) | Self::Var(_) | Self::MouseMove { .. } | Self::MouseClick(_) => true,
            Self::Passthrough(_) | Self::Blank => false,
        }
    }
}

impl fmt::Display for ActionLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(name) => write!(f, "{} {}", ActionKind::Key, name),
            Self::Var(name) => write!(f, "{} {}", ActionKind::Var, name),
            Self::MouseMove { x, y } => write!(f, "{} {} {}", ActionKind::MouseMove, x, y),
            Self::MouseClick(button) => write!(f, "{} {}", ActionKind::MouseClick, button),
            Self::Passthrough(text) => f.write_str(text),
            Self::Blank => Ok(()),
        }
    }
}

/// Errors produced while decoding step lines. Line numbers are 1-based.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("line {line}: '{keyword}' needs {expected} argument(s), found {found}")]
    MissingArgument {
        line: usize,
        keyword: ActionKind,
        expected: usize,
        found: usize,
    },

    #[error("line {line}: '{keyword}' argument '{value}' is not a valid number")]
    InvalidNumber {
        line: usize,
        keyword: ActionKind,
        value: String,
    },
}

/// Decode a single line. `line_no` is only used for error reporting.
pub fn decode_line(line: &str, line_no: usize) -> Result<ActionLine, CodecError> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let Some((first, args)) = words.split_first() else {
        return Ok(ActionLine::Blank);
    };
    let Ok(keyword) = first.parse::<ActionKind>() else {
        return Ok(ActionLine::Passthrough(line.to_string()));
    };

    if args.len() < keyword.arity() {
        return Err(CodecError::MissingArgument {
            line: line_no,
            keyword,
            expected: keyword.arity(),
            found: args.len(),
        });
    }

    let number = |value: &str| -> Result<i64, CodecError> {
        value.parse::<i64>().map_err(|_| CodecError::InvalidNumber {
            line: line_no,
            keyword,
            value: value.to_string(),
        })
    };
    let out_of_range = |value: &str| CodecError::InvalidNumber {
        line: line_no,
        keyword,
        value: value.to_string(),
    };

    let action = match keyword {
        ActionKind::Key => ActionLine::Key(args[0].to_string()),
        ActionKind::Var => ActionLine::Var(args[0].to_string()),
        ActionKind::MouseMove => {
            let x = i32::try_from(number(args[0])?).map_err(|_| out_of_range(args[0]))?;
            let y = i32::try_from(number(args[1])?).map_err(|_| out_of_range(args[1]))?;
            ActionLine::MouseMove { x, y }
        }
        ActionKind::MouseClick => {
            let button =
                MouseButton::try_from(number(args[0])?).map_err(|_| out_of_range(args[0]))?;
            ActionLine::MouseClick(button)
        }
    };
    Ok(action)
}

/// Decode every line of `text`, stopping at the first malformed action line.
pub fn decode_lines(text: &str) -> Result<Vec<ActionLine>, CodecError> {
    text.lines()
        .enumerate()
        .map(|(i, line)| decode_line(line, i + 1))
        .collect()
}

/// Decode every line of `text` and collect all errors instead of stopping.
pub fn check_lines(text: &str) -> Vec<CodecError> {
    text.lines()
        .enumerate()
        .filter_map(|(i, line)| decode_line(line, i + 1).err())
        .collect()
}

/// Render action lines back into step text, one per line.
pub fn encode_lines(lines: &[ActionLine]) -> String {
    let mut out = String::new();
    for line in lines {
        out.push_str(&line.to_string());
        out.push('\n');
    }
    out
}

/// One step as authored in Step mode, validated and ready to commit.
#[derive(Debug, Clone, PartialEq)]
pub struct StepRecord {
    ordinal: u32,
    run_time_secs: f64,
    raw: String,
    lines: Vec<ActionLine>,
}

impl StepRecord {
    /// Validate `raw` and attach the step's ordinal and cumulative run time.
    pub fn decode(ordinal: u32, run_time_secs: f64, raw: &str) -> Result<Self, CodecError> {
        let lines = decode_lines(raw)?;
        Ok(Self {
            ordinal,
            run_time_secs,
            raw: raw.to_string(),
            lines,
        })
    }

    /// Build a record from already-typed lines.
    pub fn from_actions(ordinal: u32, run_time_secs: f64, lines: Vec<ActionLine>) -> Self {
        Self {
            ordinal,
            run_time_secs,
            raw: encode_lines(&lines),
            lines,
        }
    }

    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }

    pub fn run_time_secs(&self) -> f64 {
        self.run_time_secs
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn lines(&self) -> &[ActionLine] {
        &self.lines
    }

    /// True when the step contains nothing but blank lines
    pub fn is_empty(&self) -> bool {
        self.lines.iter().all(|l| *l == ActionLine::Blank)
    }

    /// Variable names in declaration order, duplicates included
    pub fn declared_variables(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().filter_map(ActionLine::declared_variable)
    }

    /// Delimiter plus the authored lines, always newline-terminated.
    pub fn encode_block(&self) -> String {
        let mut block = String::with_capacity(STEP_DELIMITER.len() + self.raw.len() + 2);
        block.push_str(STEP_DELIMITER);
        block.push('\n');
        block.push_str(&self.raw);
        if !self.raw.is_empty() && !self.raw.ends_with('\n') {
            block.push('\n');
        }
        block
    }
}

/// Header written once at the top of a new step file.
pub fn step_file_header(generated_on: &str, host_identity: &str) -> String {
    format!(
        "# Generated by Step Maker\n# Generated on {}\n# uname -a: {}\n",
        generated_on, host_identity
    )
}

/// One `name=value` line of the vars file.
pub fn encode_var(name: &str, value: &str) -> String {
    format!("{}={}\n", name, value)
}
