// https://github.com/vorner/signal-hook/blob/master/signal-hook-registry/src/lib.rs

use std::error::Error;
use std::fmt;
use std::mem::MaybeUninit;
use std::ptr::null_mut;
use std::sync::atomic::{AtomicBool, Ordering};

use libc::{
    c_int, c_void, sigaction, sigaddset, sigemptyset, sighandler_t, siginfo_t, sigprocmask,
    sigset_t, waitpid, write, SA_NOCLDSTOP, SA_RESTART, SA_SIGINFO, SIGCHLD, SIGINT, SIG_DFL,
    SIG_IGN, STDOUT_FILENO, WNOHANG,
};
use tracing::warn;

use crate::shell::PROMPT;
use crate::sys::{describe, errno, set_errno};

/// Set while the loop waits for a foreground job; the interrupt handler then
/// leaves the prompt to the loop.
static FOREGROUND: AtomicBool = AtomicBool::new(false);

#[derive(Debug, PartialEq)]
pub enum SigError {
    Syscall(&'static str, c_int),
}

impl fmt::Display for SigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SigError::Syscall(call, error_num) => write!(f, "{}: {}", call, describe(*error_num)),
        }
    }
}

impl Error for SigError {}

fn write_raw(bytes: &[u8]) {
    unsafe { write(STDOUT_FILENO, bytes.as_ptr() as *const c_void, bytes.len()) };
}

/// Collects every child that has already terminated, without blocking.
pub(crate) fn reap_children() -> usize {
    let mut reaped = 0;
    while unsafe { waitpid(-1, null_mut(), WNOHANG) } > 0 {
        reaped += 1;
    }
    reaped
}

// Runs in signal context: write(2), waitpid(2) and atomics only.
pub(crate) extern "C" fn handler(sig: c_int, _info: *mut siginfo_t, _gdata: *mut c_void) {
    let saved_errno = errno();

    match sig {
        SIGINT => {
            write_raw(b"\n");
            if !FOREGROUND.load(Ordering::SeqCst) {
                write_raw(PROMPT.as_bytes());
            }
        }
        SIGCHLD => {
            reap_children();
        }
        _ => {}
    }

    set_errno(saved_errno);
}

fn empty_sigset() -> sigset_t {
    let mut set = MaybeUninit::<sigset_t>::uninit();
    unsafe {
        sigemptyset(set.as_mut_ptr());
        set.assume_init()
    }
}

pub(crate) fn mask_sigchld() -> Result<sigset_t, SigError> {
    let mut chld_set = empty_sigset();
    unsafe { sigaddset(&mut chld_set as *mut _, SIGCHLD) };

    match unsafe { sigprocmask(libc::SIG_BLOCK, &chld_set as *const _, null_mut()) } {
        -1 => Err(SigError::Syscall("sigprocmask", errno())),
        _ => Ok(chld_set),
    }
}

pub(crate) fn unmask_sigchld(chld_set: sigset_t) -> Result<(), SigError> {
    match unsafe { sigprocmask(libc::SIG_UNBLOCK, &chld_set as *const _, null_mut()) } {
        -1 => Err(SigError::Syscall("sigprocmask", errno())),
        _ => Ok(()),
    }
}

pub(crate) fn install_sighandler(
    signum: c_int,
    handler: extern "C" fn(c_int, *mut siginfo_t, *mut c_void),
) -> Result<(), SigError> {
    let mut sa = unsafe { MaybeUninit::<sigaction>::zeroed().assume_init() };
    sa.sa_sigaction = handler as sighandler_t;
    sa.sa_flags = SA_SIGINFO | SA_RESTART;
    if signum == SIGCHLD {
        sa.sa_flags |= SA_NOCLDSTOP;
    }
    sa.sa_mask = empty_sigset();

    match unsafe { libc::sigaction(signum, &sa, null_mut()) } {
        -1 => Err(SigError::Syscall("sigaction", errno())),
        _ => Ok(()),
    }
}

fn set_disposition(signum: c_int, disposition: sighandler_t) -> Result<(), SigError> {
    let mut sa = unsafe { MaybeUninit::<sigaction>::zeroed().assume_init() };
    sa.sa_sigaction = disposition;
    sa.sa_mask = empty_sigset();

    match unsafe { libc::sigaction(signum, &sa, null_mut()) } {
        -1 => Err(SigError::Syscall("sigaction", errno())),
        _ => Ok(()),
    }
}

/// Installs the interrupt and child-termination handlers for the lifetime of the process.
pub(crate) fn install_handlers() -> Result<(), SigError> {
    install_sighandler(SIGINT, handler)?;
    install_sighandler(SIGCHLD, handler)
}

/// Called in a freshly forked child before exec. Background children ignore
/// SIGINT so a terminal interrupt only reaches the foreground job.
pub(crate) fn restore_child_defaults(background: bool) -> Result<(), SigError> {
    set_disposition(SIGINT, if background { SIG_IGN } else { SIG_DFL })?;
    set_disposition(SIGCHLD, SIG_DFL)?;

    let empty = empty_sigset();
    match unsafe { sigprocmask(libc::SIG_SETMASK, &empty, null_mut()) } {
        -1 => Err(SigError::Syscall("sigprocmask", errno())),
        _ => Ok(()),
    }
}

/// Held by the loop around forking and waiting for a foreground job. SIGCHLD
/// stays blocked meanwhile so the reaper cannot collect the job's children.
pub(crate) struct Foreground {
    chld_set: sigset_t,
}

impl Foreground {
    pub(crate) fn enter() -> Result<Foreground, SigError> {
        let chld_set = mask_sigchld()?;
        FOREGROUND.store(true, Ordering::SeqCst);
        Ok(Foreground { chld_set })
    }
}

impl Drop for Foreground {
    fn drop(&mut self) {
        FOREGROUND.store(false, Ordering::SeqCst);
        if let Err(e) = unmask_sigchld(self.chld_set) {
            warn!(error = %e, "failed to unblock SIGCHLD");
        }
    }
}
