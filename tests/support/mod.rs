use lazy_static::lazy_static;

use sysqual::{Catalog, NumberSet, Personality, SyscallFlags as F};

pub const P64: Personality = Personality::new(0);
pub const P32: Personality = Personality::new(1);
pub const X32: Personality = Personality::new(2);

/// Start of the ARM-style private syscall range in the `32` personality.
pub const PRIVATE_BASE: u32 = 0x000f_0000;

/// Table index of the first private syscall in the `32` personality.
pub const PRIVATE_INDEX: u32 = 400;

lazy_static! {
    static ref CATALOGS: Vec<Catalog> = vec![
        Catalog::new("64")
            .with_entry(0, "read", F::DESC)
            .with_entry(1, "write", F::DESC)
            .with_entry(2, "open", F::DESC | F::FILE)
            .with_entry(3, "close", F::DESC)
            .with_entry(4, "stat", F::FILE | F::STAT | F::STAT_LIKE)
            .with_entry(5, "fstat", F::DESC | F::FSTAT | F::STAT_LIKE)
            .with_entry(39, "getpid", F::PURE)
            .with_entry(41, "socket", F::NETWORK)
            .with_entry(57, "fork", F::PROCESS)
            .with_entry(59, "execve", F::FILE | F::PROCESS)
            .with_entry(62, "kill", F::PROCESS | F::SIGNAL)
            .with_entry(102, "getuid", F::PURE | F::CREDS)
            .with_entry(257, "openat", F::DESC | F::FILE)
            .with_entry(262, "newfstatat", F::DESC | F::FILE | F::STAT_LIKE),
        Catalog::new("32")
            .with_entry(2, "fork", F::PROCESS)
            .with_entry(3, "read", F::DESC)
            .with_entry(4, "write", F::DESC)
            .with_entry(5, "open", F::DESC | F::FILE)
            .with_entry(6, "close", F::DESC)
            .with_entry(11, "execve", F::FILE | F::PROCESS)
            .with_entry(20, "getpid", F::PURE)
            .with_entry(37, "kill", F::PROCESS | F::SIGNAL)
            .with_entry(106, "stat", F::FILE | F::STAT | F::STAT_LIKE)
            .with_entry(108, "fstat", F::DESC | F::FSTAT | F::STAT_LIKE)
            .with_entry(295, "openat", F::DESC | F::FILE)
            .with_entry(PRIVATE_INDEX, "breakpoint", F::empty())
            .with_unshuffle(|n| {
                if n >= PRIVATE_BASE {
                    n - PRIVATE_BASE + PRIVATE_INDEX
                } else {
                    n
                }
            }),
        Catalog::new("x32")
            .with_entry(0, "read", F::DESC)
            .with_entry(1, "write", F::DESC)
            .with_entry(2, "open", F::DESC | F::FILE)
            .with_entry(3, "close", F::DESC)
            .with_entry(19, "readv", F::DESC)
            .with_entry(39, "getpid", F::PURE)
            .with_entry(515, "readv", F::DESC),
    ];
}

/// Catalogs for three personalities: `64`, `32` and `x32`.
pub fn catalogs() -> Vec<Catalog> {
    CATALOGS.clone()
}

/// Members of `set` below `universe`, in order.
pub fn members(set: &NumberSet, universe: u32) -> Vec<u32> {
    (0..universe).filter(|&n| set.contains(n)).collect()
}

/// Compile a registry from expressions over the test catalogs.
macro_rules! registry {
    ($($expr: expr),* $(,)?) => {
        sysqual::RuleRegistry::from_expressions(support::catalogs(), vec![$($expr),*])
    };
}
