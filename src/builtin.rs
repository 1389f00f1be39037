use std::env;
use std::error::Error;
use std::fmt;
use std::io;

use tracing::debug;

use crate::sys::describe;

/// What the read-eval loop does after a builtin ran.
#[derive(Debug, PartialEq)]
pub(crate) enum Flow {
    Continue,
    Exit,
}

#[derive(Debug)]
pub enum BuiltinError {
    MissingArgument(&'static str),
    ChangeDirectory(String, io::Error),
}

impl fmt::Display for BuiltinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuiltinError::MissingArgument(name) => write!(f, "expected argument to \"{}\"", name),
            BuiltinError::ChangeDirectory(path, e) => match e.raw_os_error() {
                Some(error_num) => write!(f, "cd: {}: {}", path, describe(error_num)),
                None => write!(f, "cd: {}: {}", path, e),
            },
        }
    }
}

impl Error for BuiltinError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            BuiltinError::MissingArgument(_) => None,
            BuiltinError::ChangeDirectory(_, e) => Some(e),
        }
    }
}

pub(crate) type Builtin = fn(&[&str]) -> Result<Flow, BuiltinError>;

pub(crate) fn builtin_exit(_: &[&str]) -> Result<Flow, BuiltinError> {
    Ok(Flow::Exit)
}

/// Changes the working directory of the interpreter itself, and with it the
/// starting directory of every child spawned afterwards.
pub(crate) fn builtin_cd(argv: &[&str]) -> Result<Flow, BuiltinError> {
    let path = argv
        .get(1)
        .ok_or(BuiltinError::MissingArgument("cd"))?;

    env::set_current_dir(path).map_err(|e| BuiltinError::ChangeDirectory(path.to_string(), e))?;
    debug!(path, "changed directory");

    Ok(Flow::Continue)
}

pub(crate) fn match_builtin(name: &str) -> Option<Builtin> {
    match name {
        "exit" => Some(builtin_exit),
        "cd" => Some(builtin_cd),
        _ => None,
    }
}
