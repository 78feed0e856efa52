//! Name-to-number resolvers for qualifier tokens and injection directives.

use nix::errno::Errno;
use nix::sys::signal::Signal;


/// Largest errno value a tracee can observe as an error return.
pub const MAX_ERRNO: u32 = 4095;

/// Size of the kernel signal mask in bytes.
pub const NSIG_BYTES: u32 = 8;

// Kernel-internal restart codes, never defined by libc but visible to tracers.
const KERNEL_ERRNOS: &[(&str, u32)] = &[
    ("ERESTARTSYS", 512),
    ("ERESTARTNOINTR", 513),
    ("ERESTARTNOHAND", 514),
    ("ENOIOCTLCMD", 515),
    ("ERESTART_RESTARTBLOCK", 516),
];

/// Parse a plain non-negative decimal integer no greater than `i32::MAX`.
pub fn uint(s: &str) -> Option<u32> {
    uint_upto(s, i32::MAX as u32)
}

/// Parse a plain non-negative decimal integer no greater than `max`.
pub fn uint_upto(s: &str, max: u32) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    s.parse::<u64>()
        .ok()
        .filter(|&n| n <= u64::from(max))
        .map(|n| n as u32)
}

/// File descriptor number.
pub fn descriptor(s: &str) -> Option<u32> {
    uint(s)
}

/// Signal number, by decimal value or by name, with or without the `SIG` prefix.
pub fn signal(s: &str) -> Option<u32> {
    if s.starts_with(|c: char| c.is_ascii_digit()) {
        return uint_upto(s, 255);
    }

    let bare = match s.get(..3) {
        Some(prefix) if prefix.eq_ignore_ascii_case("SIG") => &s[3..],
        _ => s,
    };

    Signal::iterator()
        .find(|sig| sig.as_str()[3..].eq_ignore_ascii_case(bare))
        .map(|sig| sig as i32 as u32)
}

/// Error number, by decimal value in `1..=MAX_ERRNO` or by name (`EACCES`).
pub fn errno(s: &str) -> Option<u32> {
    if s.starts_with(|c: char| c.is_ascii_digit()) {
        return uint_upto(s, MAX_ERRNO).filter(|&n| n >= 1);
    }

    if let Some(&(_, n)) = KERNEL_ERRNOS.iter().find(|(name, _)| *name == s) {
        return Some(n);
    }

    (1..=MAX_ERRNO as i32)
        .map(Errno::from_i32)
        .filter(|&e| e != Errno::UnknownErrno)
        .find(|e| format!("{:?}", e) == s)
        .map(|e| e as i32 as u32)
}

/// Defines a closed set of named qualifier values, with optional alias spellings.
macro_rules! named_values {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $($variant:ident => [$($spelling:literal),+],)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
        #[repr(u32)]
        pub enum $name {
            $($variant,)+
        }

        impl $name {
            const SPELLINGS: &'static [(&'static str, $name)] = &[
                $($(($spelling, $name::$variant),)+)+
            ];

            pub fn parse(s: &str) -> Option<Self> {
                Self::SPELLINGS
                    .iter()
                    .find(|(spelling, _)| *spelling == s)
                    .map(|&(_, value)| value)
            }

            /// Resolver for the qualifier set holding these values.
            pub fn lookup(s: &str) -> Option<u32> {
                Self::parse(s).map(|value| value as u32)
            }
        }

        impl From<$name> for u32 {
            fn from(value: $name) -> u32 {
                value as u32
            }
        }
    };
}

named_values! {
    /// Syscall completion states selectable with `status=`.
    pub enum Status {
        Successful => ["successful"],
        Failed => ["failed"],
        Unfinished => ["unfinished"],
        Unavailable => ["unavailable"],
        Detached => ["detached"],
    }
}

named_values! {
    /// Informational messages suppressible with `quiet=`.
    pub enum Quiet {
        Attach => ["attach"],
        Exit => ["exit", "exits"],
        PathResolution => ["path-resolution"],
        Personality => ["personality"],
        ThreadExecve => ["thread-execve", "superseded"],
    }
}

named_values! {
    /// Extra descriptor decoding selectable with `decode-fd=`.
    pub enum DecodeFd {
        Path => ["path"],
        Socket => ["socket"],
        Dev => ["dev"],
        Pidfd => ["pidfd"],
        Signalfd => ["signalfd"],
    }
}

named_values! {
    /// Extra PID decoding selectable with `decode-pid=`.
    pub enum DecodePid {
        Pidns => ["pidns"],
        Comm => ["comm"],
    }
}

named_values! {
    /// SELinux context display modes selectable with `secontext=`.
    pub enum Secontext {
        Full => ["full"],
        Mismatch => ["mismatch"],
    }
}
