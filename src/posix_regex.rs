//! POSIX extended regular expressions, via the C library.
//!
//! Syscall regex tokens must keep the platform's ERE dialect: unanchored, case-sensitive,
//! substring matches. A different engine would silently change which calls a token selects.

use std::ffi::{CStr, CString};
use std::mem::MaybeUninit;

use crate::error::{Error, Result};


pub struct PosixRegex {
    pattern: String,
    preg: Box<libc::regex_t>,
}

impl PosixRegex {
    pub fn new(pattern: &str) -> Result<Self> {
        let c_pattern = CString::new(pattern)
            .map_err(|_| regex_error(pattern, "pattern contains a NUL byte"))?;

        let mut preg: Box<MaybeUninit<libc::regex_t>> = Box::new(MaybeUninit::uninit());
        let flags = libc::REG_EXTENDED | libc::REG_NOSUB;

        // SAFETY: `preg` is valid for writes of a `regex_t`, and `c_pattern` is
        // NUL-terminated and outlives the call.
        let rc = unsafe { libc::regcomp(preg.as_mut_ptr(), c_pattern.as_ptr(), flags) };

        if rc != 0 {
            // A failed `regcomp()` releases its own allocations; only the message remains.
            //
            // SAFETY: `regerror()` only reads `preg` for context, and accepts the
            // `regex_t` left behind by a failed `regcomp()`.
            let message = unsafe { describe(rc, preg.as_ptr()) };
            return Err(regex_error(pattern, message));
        }

        // SAFETY: a successful `regcomp()` fully initialized the `regex_t`.
        let preg = unsafe { Box::from_raw(Box::into_raw(preg) as *mut libc::regex_t) };
        let pattern = pattern.to_owned();

        Ok(Self { pattern, preg })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// True if the pattern matches anywhere in `text`.
    pub fn is_match(&self, text: &str) -> Result<bool> {
        let c_text = match CString::new(text) {
            Ok(c_text) => c_text,
            Err(_) => return Ok(false),
        };

        // SAFETY: `self.preg` was initialized by `regcomp()`. With `REG_NOSUB` and
        // `nmatch == 0`, `pmatch` is never written.
        let rc = unsafe {
            libc::regexec(&*self.preg, c_text.as_ptr(), 0, std::ptr::null_mut(), 0)
        };

        match rc {
            0 => Ok(true),
            libc::REG_NOMATCH => Ok(false),
            rc => {
                let message = unsafe { describe(rc, &*self.preg) };
                Err(regex_error(&self.pattern, message))
            },
        }
    }
}

impl Drop for PosixRegex {
    fn drop(&mut self) {
        // SAFETY: initialized by a successful `regcomp()`, and freed exactly once.
        unsafe { libc::regfree(&mut *self.preg) };
    }
}

// Render a `regcomp()`/`regexec()` error code.
unsafe fn describe(rc: libc::c_int, preg: *const libc::regex_t) -> String {
    let len = libc::regerror(rc, preg, std::ptr::null_mut(), 0);

    if len == 0 {
        return format!("regex error {}", rc);
    }

    let mut buf = vec![0 as libc::c_char; len];
    libc::regerror(rc, preg, buf.as_mut_ptr(), buf.len());

    CStr::from_ptr(buf.as_ptr()).to_string_lossy().into_owned()
}

fn regex_error(pattern: &str, message: impl Into<String>) -> Error {
    let pattern = pattern.to_owned();
    let message = message.into();
    Error::Regex { pattern, message }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unanchored_substring() {
        let re = PosixRegex::new("stat").unwrap();

        assert!(re.is_match("stat").unwrap());
        assert!(re.is_match("newfstatat").unwrap());
        assert!(!re.is_match("STAT").unwrap());
        assert!(!re.is_match("open").unwrap());
    }

    #[test]
    fn test_extended_syntax() {
        let re = PosixRegex::new("^(open|close)$").unwrap();

        assert!(re.is_match("open").unwrap());
        assert!(re.is_match("close").unwrap());
        assert!(!re.is_match("openat").unwrap());
    }

    #[test]
    fn test_compile_error() {
        let err = PosixRegex::new("(").err().unwrap();
        assert!(matches!(err, Error::Regex { .. }));
    }
}
