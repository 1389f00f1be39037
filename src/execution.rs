use std::error::Error;
use std::ffi::{CStr, CString, NulError};
use std::fmt;
use std::io::{self, Write};
use std::ptr::null;

use libc::{
    c_char, c_int, c_uint, close, dup2, execvp, fork, open, pid_t, pipe, waitpid, EINTR,
    EXIT_FAILURE, O_APPEND, O_CREAT, O_RDONLY, O_TRUNC, O_WRONLY, STDIN_FILENO, STDOUT_FILENO,
};
use tracing::debug;

use crate::parser::{Command, Pipeline, Redirection};
use crate::sig::{self, Foreground, SigError};
use crate::sys::{describe, errno};

const OUTPUT_MODE: c_uint = 0o644;

#[derive(Debug)]
pub enum ExecutionError {
    Syscall(&'static str, c_int),
    Open(String, c_int),
    Exec(String, c_int),
    Nul(NulError),
    Signal(SigError),
    MissingCommand,
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionError::Syscall(call, error_num) => {
                write!(f, "{}: {}", call, describe(*error_num))
            }
            ExecutionError::Open(path, error_num) => write!(f, "{}: {}", path, describe(*error_num)),
            ExecutionError::Exec(name, error_num) => write!(f, "{}: {}", name, describe(*error_num)),
            ExecutionError::Nul(e) => write!(f, "invalid argument: {}", e),
            ExecutionError::Signal(e) => write!(f, "{}", e),
            ExecutionError::MissingCommand => write!(f, "missing command"),
        }
    }
}

impl Error for ExecutionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ExecutionError::Nul(e) => Some(e),
            ExecutionError::Signal(e) => Some(e),
            _ => None,
        }
    }
}

impl From<NulError> for ExecutionError {
    fn from(e: NulError) -> ExecutionError {
        ExecutionError::Nul(e)
    }
}

impl From<SigError> for ExecutionError {
    fn from(e: SigError) -> ExecutionError {
        ExecutionError::Signal(e)
    }
}

/// How a waited-for child ended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Status {
    Exited(c_int),
    Signaled(c_int),
}

impl Status {
    fn from_raw(raw: c_int) -> Status {
        if libc::WIFEXITED(raw) {
            Status::Exited(libc::WEXITSTATUS(raw))
        } else {
            Status::Signaled(libc::WTERMSIG(raw))
        }
    }
}

/// An argument vector converted for `execvp` ahead of the fork, so the child
/// does not have to allocate before replacing its image.
struct Program {
    argv: Vec<CString>,
    ptrs: Vec<*const c_char>,
}

impl Program {
    fn new(argv: &[&str]) -> Result<Program, ExecutionError> {
        if argv.is_empty() {
            return Err(ExecutionError::MissingCommand);
        }

        let argv = argv
            .iter()
            .map(|arg| CString::new(*arg))
            .collect::<Result<Vec<_>, _>>()?;
        let mut ptrs: Vec<*const c_char> = argv.iter().map(|arg| arg.as_ptr()).collect();
        ptrs.push(null());

        Ok(Program { argv, ptrs })
    }

    /// Only returns if the image could not be replaced.
    fn exec(&self) -> ExecutionError {
        unsafe { execvp(self.ptrs[0], self.ptrs.as_ptr()) };
        ExecutionError::Exec(self.argv[0].to_string_lossy().into_owned(), errno())
    }
}

struct Targets {
    input: Option<CString>,
    output: Option<(CString, bool)>,
}

impl Targets {
    fn new(redirection: &Redirection) -> Result<Targets, ExecutionError> {
        let input = redirection.input.map(CString::new).transpose()?;
        let output = redirection
            .output
            .map(CString::new)
            .transpose()?
            .map(|path| (path, redirection.append));

        Ok(Targets { input, output })
    }

    fn apply(&self) -> Result<(), ExecutionError> {
        if let Some(path) = &self.input {
            redirect(path, O_RDONLY, STDIN_FILENO)?;
        }

        if let Some((path, append)) = &self.output {
            let mode = if *append { O_APPEND } else { O_TRUNC };
            redirect(path, O_WRONLY | O_CREAT | mode, STDOUT_FILENO)?;
        }

        Ok(())
    }
}

fn redirect(path: &CStr, flags: c_int, target: c_int) -> Result<(), ExecutionError> {
    let fd = unsafe { open(path.as_ptr(), flags, OUTPUT_MODE) };
    if fd == -1 {
        return Err(ExecutionError::Open(
            path.to_string_lossy().into_owned(),
            errno(),
        ));
    }

    bind(fd, target)
}

/// Moves `fd` onto `target` and closes the original descriptor.
fn bind(fd: c_int, target: c_int) -> Result<(), ExecutionError> {
    if fd == target {
        return Ok(());
    }

    match unsafe { dup2(fd, target) } {
        -1 => Err(ExecutionError::Syscall("dup2", errno())),
        _ => close_fd(fd),
    }
}

fn close_fd(fd: c_int) -> Result<(), ExecutionError> {
    match unsafe { close(fd) } {
        -1 => Err(ExecutionError::Syscall("close", errno())),
        _ => Ok(()),
    }
}

enum Fork {
    Parent(pid_t),
    Child,
}

fn fork_child() -> Result<Fork, ExecutionError> {
    match unsafe { fork() } {
        -1 => Err(ExecutionError::Syscall("fork", errno())),
        0 => Ok(Fork::Child),
        pid => Ok(Fork::Parent(pid)),
    }
}

/// Body of every forked child: signal defaults, descriptor wiring, exec.
/// Whatever fails is reported and the child exits without returning.
fn run_child<F>(program: &Program, wire: F, background: bool) -> !
where
    F: FnOnce() -> Result<(), ExecutionError>,
{
    let result = sig::restore_child_defaults(background)
        .map_err(ExecutionError::from)
        .and_then(|()| wire())
        .map(|()| program.exec());

    let error = match result {
        Ok(e) | Err(e) => e,
    };
    let _ = writeln!(io::stderr(), "myshell: {}", error);

    unsafe { libc::_exit(EXIT_FAILURE) }
}

fn wait_foreground(pid: pid_t) -> Result<Status, ExecutionError> {
    let mut raw: c_int = 0;

    loop {
        if unsafe { waitpid(pid, &mut raw, 0) } != -1 {
            return Ok(Status::from_raw(raw));
        }

        match errno() {
            EINTR => continue,
            error_num => return Err(ExecutionError::Syscall("waitpid", error_num)),
        }
    }
}

/// Runs one command. Returns `None` for a background command, which is left
/// to the SIGCHLD reaper; otherwise waits and returns the child's status.
pub(crate) fn launch(command: &Command) -> Result<Option<Status>, ExecutionError> {
    let program = Program::new(&command.argv)?;
    let targets = Targets::new(&command.redirection)?;

    if command.background {
        let pid = match fork_child()? {
            Fork::Parent(pid) => pid,
            Fork::Child => run_child(&program, || targets.apply(), true),
        };
        debug!(pid, name = ?command.name(), "started background child");
        return Ok(None);
    }

    let _foreground = Foreground::enter()?;
    let pid = match fork_child()? {
        Fork::Parent(pid) => pid,
        Fork::Child => run_child(&program, || targets.apply(), false),
    };
    debug!(pid, name = ?command.name(), "started foreground child");

    let status = wait_foreground(pid)?;
    debug!(pid, ?status, "foreground child finished");

    Ok(Some(status))
}

fn close_pipe(filedes: [c_int; 2]) {
    for fd in filedes.iter() {
        unsafe { close(*fd) };
    }
}

/// Runs `left | right` and waits for both stages.
pub(crate) fn run_pipeline(pipeline: &Pipeline) -> Result<(Status, Status), ExecutionError> {
    let left = Program::new(&pipeline.left.argv)?;
    let right = Program::new(&pipeline.right.argv)?;

    let _foreground = Foreground::enter()?;

    let mut filedes: [c_int; 2] = [-1, -1];
    if unsafe { pipe(filedes.as_mut_ptr()) } == -1 {
        return Err(ExecutionError::Syscall("pipe", errno()));
    }
    let [read_end, write_end] = filedes;

    let left_pid = match fork_child() {
        Ok(Fork::Parent(pid)) => pid,
        Ok(Fork::Child) => run_child(
            &left,
            || {
                bind(write_end, STDOUT_FILENO)?;
                close_fd(read_end)
            },
            false,
        ),
        Err(e) => {
            close_pipe(filedes);
            return Err(e);
        }
    };

    let right_pid = match fork_child() {
        Ok(Fork::Parent(pid)) => pid,
        Ok(Fork::Child) => run_child(
            &right,
            || {
                bind(read_end, STDIN_FILENO)?;
                close_fd(write_end)
            },
            false,
        ),
        Err(e) => {
            close_pipe(filedes);
            let _ = wait_foreground(left_pid);
            return Err(e);
        }
    };

    // the parent's copies would keep the right stage from ever seeing end of file
    close_pipe(filedes);
    debug!(left_pid, right_pid, "started pipeline");

    let left_status = wait_foreground(left_pid);
    let right_status = wait_foreground(right_pid);
    debug!(?left_status, ?right_status, "pipeline finished");

    Ok((left_status?, right_status?))
}
