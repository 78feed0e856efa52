//! Per-personality syscall tables consumed by the qualifier compiler.

use std::fmt;

use bitflags::bitflags;

/// An ABI variant of the tracee (native, 32-bit compat, x32, ...), as an index into the
/// configured catalogs.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Personality(usize);

impl Personality {
    pub const NATIVE: Personality = Personality(0);

    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for Personality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

bitflags! {
    /// Class and property bits of a catalog entry.
    pub struct SyscallFlags: u32 {
        const DESC = 1 << 0;
        const FILE = 1 << 1;
        const IPC = 1 << 2;
        const NETWORK = 1 << 3;
        const PROCESS = 1 << 4;
        const SIGNAL = 1 << 5;
        const MEMORY = 1 << 6;
        const STAT = 1 << 7;
        const LSTAT = 1 << 8;
        const FSTAT = 1 << 9;
        const STAT_LIKE = 1 << 10;
        const STATFS = 1 << 11;
        const FSTATFS = 1 << 12;
        const STATFS_LIKE = 1 << 13;
        /// No side effects; may be used as a `syscall=` injection target.
        const PURE = 1 << 14;
        const CREDS = 1 << 15;
        const CLOCK = 1 << 16;
    }
}

const CLASSES: &[(&str, SyscallFlags)] = &[
    ("%desc", SyscallFlags::DESC),
    ("%file", SyscallFlags::FILE),
    ("%memory", SyscallFlags::MEMORY),
    ("%process", SyscallFlags::PROCESS),
    ("%signal", SyscallFlags::SIGNAL),
    ("%ipc", SyscallFlags::IPC),
    ("%net", SyscallFlags::NETWORK),
    ("%network", SyscallFlags::NETWORK),
    ("%stat", SyscallFlags::STAT),
    ("%lstat", SyscallFlags::LSTAT),
    ("%fstat", SyscallFlags::FSTAT),
    ("%%stat", SyscallFlags::STAT_LIKE),
    ("%statfs", SyscallFlags::STATFS),
    ("%fstatfs", SyscallFlags::FSTATFS),
    ("%%statfs", SyscallFlags::STATFS_LIKE),
    ("%pure", SyscallFlags::PURE),
    ("%creds", SyscallFlags::CREDS),
    ("%clock", SyscallFlags::CLOCK),
    // Legacy spellings.
    ("all", SyscallFlags::empty()),
    ("desc", SyscallFlags::DESC),
    ("file", SyscallFlags::FILE),
    ("memory", SyscallFlags::MEMORY),
    ("process", SyscallFlags::PROCESS),
    ("signal", SyscallFlags::SIGNAL),
    ("ipc", SyscallFlags::IPC),
    ("network", SyscallFlags::NETWORK),
];

/// Resolve a class token (`%file`, `%%stat`, or a legacy bare name) to its bitmask.
///
/// A syscall belongs to the class iff `flags & mask == mask`, so the empty mask of
/// `all` matches every named entry.
pub fn lookup_class(token: &str) -> Option<SyscallFlags> {
    CLASSES
        .iter()
        .find(|(name, _)| *name == token)
        .map(|&(_, mask)| mask)
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SyscallEntry {
    pub name: String,
    pub flags: SyscallFlags,
}

/// Syscall table for one personality.
///
/// Indices are syscall numbers. Holes (`None`) are numbers with no known syscall.
#[derive(Clone)]
pub struct Catalog {
    designator: String,
    entries: Vec<Option<SyscallEntry>>,
    unshuffle: fn(u32) -> u32,
}

impl fmt::Debug for Catalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Catalog")
            .field("designator", &self.designator)
            .field("len", &self.entries.len())
            .finish()
    }
}

impl Catalog {
    /// Empty catalog, selected in qualifiers by `@designator`.
    pub fn new(designator: impl Into<String>) -> Self {
        let designator = designator.into();
        let entries = vec![];
        let unshuffle: fn(u32) -> u32 = |n| n;

        Self { designator, entries, unshuffle }
    }

    pub fn with_entry(mut self, n: u32, name: impl Into<String>, flags: SyscallFlags) -> Self {
        self.insert(n, name, flags);
        self
    }

    /// Map user-visible numbers onto table indices, for ABIs that renumber a private range.
    pub fn with_unshuffle(mut self, unshuffle: fn(u32) -> u32) -> Self {
        self.unshuffle = unshuffle;
        self
    }

    pub fn insert(&mut self, n: u32, name: impl Into<String>, flags: SyscallFlags) {
        let index = n as usize;

        if index >= self.entries.len() {
            self.entries.resize(index + 1, None);
        }

        let name = name.into();
        self.entries[index] = Some(SyscallEntry { name, flags });
    }

    pub fn designator(&self) -> &str {
        &self.designator
    }

    /// Size of the table, i.e. one past the largest syscall number.
    pub fn len(&self) -> u32 {
        self.entries.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, n: u32) -> Option<&SyscallEntry> {
        self.entries.get(n as usize).and_then(Option::as_ref)
    }

    pub fn name(&self, n: u32) -> Option<&str> {
        self.entry(n).map(|e| e.name.as_str())
    }

    pub fn flags(&self, n: u32) -> SyscallFlags {
        self.entry(n)
            .map(|e| e.flags)
            .unwrap_or_else(SyscallFlags::empty)
    }

    /// True if `n` names a syscall of this personality.
    pub fn is_valid(&self, n: u32) -> bool {
        self.entry(n).is_some()
    }

    pub fn unshuffle(&self, n: u32) -> u32 {
        (self.unshuffle)(n)
    }

    /// Every number whose entry is called `name`. Aliases yield more than one.
    pub fn lookup<'a>(&'a self, name: &'a str) -> impl Iterator<Item = u32> + 'a {
        self.entries()
            .filter(move |(_, e)| e.name == name)
            .map(|(n, _)| n)
    }

    pub fn entries(&self) -> impl Iterator<Item = (u32, &SyscallEntry)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(n, e)| e.as_ref().map(|e| (n as u32, e)))
    }

    /// Catalog of the host ABI, named from the `syscalls` crate's table.
    pub fn native() -> Self {
        use syscalls::Sysno;

        let designator = if cfg!(target_pointer_width = "64") { "64" } else { "32" };
        let mut catalog = Catalog::new(designator);

        for sysno in Sysno::iter() {
            let name = sysno.name();
            catalog.insert(sysno.id() as u32, name, native_flags(name));
        }

        catalog
    }
}

fn native_flags(name: &str) -> SyscallFlags {
    use SyscallFlags as F;

    const DF: SyscallFlags = SyscallFlags::DESC.union(SyscallFlags::FILE);
    const STAT: SyscallFlags = SyscallFlags::FILE
        .union(SyscallFlags::STAT)
        .union(SyscallFlags::STAT_LIKE);
    const LSTAT: SyscallFlags = SyscallFlags::FILE
        .union(SyscallFlags::LSTAT)
        .union(SyscallFlags::STAT_LIKE);
    const FSTAT: SyscallFlags = SyscallFlags::DESC
        .union(SyscallFlags::FSTAT)
        .union(SyscallFlags::STAT_LIKE);
    const STATFS: SyscallFlags = SyscallFlags::FILE
        .union(SyscallFlags::STATFS)
        .union(SyscallFlags::STATFS_LIKE);
    const FSTATFS: SyscallFlags = SyscallFlags::DESC
        .union(SyscallFlags::FSTATFS)
        .union(SyscallFlags::STATFS_LIKE);
    const PCREDS: SyscallFlags = SyscallFlags::PURE.union(SyscallFlags::CREDS);

    match name {
        "read" | "write" | "close" | "pread64" | "pwrite64" | "readv" | "writev"
        | "preadv" | "pwritev" | "preadv2" | "pwritev2" | "lseek" | "ioctl" | "dup"
        | "dup2" | "dup3" | "fcntl" | "flock" | "fsync" | "fdatasync" | "ftruncate"
        | "getdents" | "getdents64" | "select" | "pselect6" | "poll" | "ppoll"
        | "epoll_create" | "epoll_create1" | "epoll_ctl" | "epoll_wait"
        | "epoll_pwait" | "eventfd" | "eventfd2" | "pipe" | "pipe2" | "sendfile"
        | "splice" | "tee" | "timerfd_create" | "timerfd_settime" | "timerfd_gettime"
        | "fchmod" | "fchown" | "fchdir" | "fallocate" | "fadvise64" | "readahead"
        | "memfd_create" | "pidfd_open" | "close_range" => F::DESC,
        "open" | "openat" | "openat2" | "creat" | "mknodat" | "mkdirat" | "fchownat"
        | "futimesat" | "unlinkat" | "renameat" | "renameat2" | "linkat"
        | "symlinkat" | "readlinkat" | "fchmodat" | "faccessat" | "faccessat2"
        | "name_to_handle_at" | "open_by_handle_at" | "inotify_add_watch"
        | "fanotify_mark" | "utimensat" | "execveat" => DF,
        "access" | "chdir" | "chmod" | "chown" | "lchown" | "link" | "unlink"
        | "symlink" | "readlink" | "rename" | "mkdir" | "rmdir" | "mknod" | "truncate"
        | "utime" | "utimes" | "chroot" | "acct" | "mount" | "umount2" | "swapon"
        | "swapoff" | "pivot_root" | "getcwd" | "setxattr" | "getxattr"
        | "listxattr" | "removexattr" => F::FILE,
        "stat" => STAT,
        "lstat" => LSTAT,
        "fstat" => FSTAT,
        "newfstatat" | "statx" => DF | F::STAT_LIKE,
        "statfs" => STATFS,
        "fstatfs" => FSTATFS,
        "execve" => F::FILE | F::PROCESS,
        "fork" | "vfork" | "clone" | "clone3" | "exit" | "exit_group" | "wait4"
        | "waitid" | "kill" | "tkill" | "tgkill" | "unshare" | "setns" => F::PROCESS,
        "rt_sigaction" | "rt_sigprocmask" | "rt_sigreturn" | "rt_sigpending"
        | "rt_sigtimedwait" | "rt_sigqueueinfo" | "rt_tgsigqueueinfo"
        | "rt_sigsuspend" | "sigaltstack" | "pause" | "signalfd" | "signalfd4" => {
            F::SIGNAL
        },
        "mmap" | "munmap" | "mprotect" | "brk" | "mremap" | "msync" | "mincore"
        | "madvise" | "mlock" | "mlock2" | "munlock" | "mlockall" | "munlockall"
        | "remap_file_pages" | "mbind" | "set_mempolicy" | "get_mempolicy"
        | "pkey_mprotect" => F::MEMORY,
        "shmget" | "shmat" | "shmctl" | "shmdt" | "semget" | "semop" | "semctl"
        | "semtimedop" | "msgget" | "msgsnd" | "msgrcv" | "msgctl" => F::IPC,
        "socket" | "socketpair" | "connect" | "accept" | "accept4" | "bind"
        | "listen" | "sendto" | "recvfrom" | "sendmsg" | "recvmsg" | "sendmmsg"
        | "recvmmsg" | "shutdown" | "getsockname" | "getpeername" | "setsockopt"
        | "getsockopt" => F::NETWORK,
        // Pure calls take no pointer arguments, so a redirect cannot write through
        // the original call's arguments.
        "getuid" | "geteuid" | "getgid" | "getegid" => PCREDS,
        "getresuid" | "getresgid" | "getgroups" => F::CREDS,
        "setuid" | "setgid" | "setreuid" | "setregid" | "setresuid" | "setresgid"
        | "setfsuid" | "setfsgid" | "setgroups" | "capget" | "capset" => F::CREDS,
        "getpid" | "getppid" | "gettid" | "getpgrp" | "sched_yield" | "getpagesize" => F::PURE,
        "clock_gettime" | "clock_getres" | "gettimeofday" | "time" | "clock_settime"
        | "clock_adjtime" | "clock_nanosleep" | "settimeofday" | "adjtimex" => F::CLOCK,
        _ => F::empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_lookup() {
        assert_eq!(lookup_class("%net"), Some(SyscallFlags::NETWORK));
        assert_eq!(lookup_class("network"), Some(SyscallFlags::NETWORK));
        assert_eq!(lookup_class("%%stat"), Some(SyscallFlags::STAT_LIKE));
        assert_eq!(lookup_class("all"), Some(SyscallFlags::empty()));
        assert_eq!(lookup_class("net"), None);
        assert_eq!(lookup_class("%bogus"), None);
    }

    #[test]
    fn test_native_names_read() {
        let catalog = Catalog::native();

        assert!(catalog.lookup("read").next().is_some());
        assert!(catalog.flags(catalog.lookup("getpid").next().unwrap()).contains(SyscallFlags::PURE));
    }

    #[test]
    fn test_native_pure_excludes_pointer_writers() {
        let catalog = Catalog::native();
        let pure = |name| {
            catalog
                .lookup(name)
                .next()
                .map(|n| catalog.flags(n).contains(SyscallFlags::PURE))
        };

        for &name in &["getpid", "getppid", "gettid", "getuid", "getegid", "sched_yield"] {
            assert_eq!(pure(name), Some(true), "{}", name);
        }

        for &name in &["getrandom", "clock_gettime", "gettimeofday", "getresuid", "getgroups"] {
            assert_eq!(pure(name), Some(false), "{}", name);
        }
    }
}
