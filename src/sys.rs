use std::ffi::CStr;

use libc::{__errno_location, c_int, strerror};

pub(crate) fn errno() -> c_int {
    unsafe { *__errno_location() }
}

/// Only touches the thread-local errno slot, so it is usable from a signal handler.
pub(crate) fn set_errno(value: c_int) {
    unsafe { *__errno_location() = value };
}

pub(crate) fn describe(error_num: c_int) -> String {
    unsafe { CStr::from_ptr(strerror(error_num)) }
        .to_string_lossy()
        .into_owned()
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_describe() {
        assert_eq!(super::describe(libc::ENOENT), "No such file or directory");
    }

    #[test]
    fn test_errno_roundtrip() {
        super::set_errno(libc::EINTR);
        assert_eq!(super::errno(), libc::EINTR);
    }
}
