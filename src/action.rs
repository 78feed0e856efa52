//! Append-only arenas for injection payloads.
//!
//! The rule table holds one [`Rule`](crate::inject::Rule) per (personality, syscall) slot,
//! so variable-size or wide payloads live here and rules refer to them by 16-bit handle.
//! Each arena has its own handle type, so a handle can only index the arena that issued it.

use std::convert::TryFrom;
use std::marker::PhantomData;
use std::time::Duration;

use tracing::trace;

use crate::error::internal_error;


/// Largest number of bytes a single poke may write.
pub const MAX_POKE_BYTES: usize = 1024;

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
        pub struct $name(u16);

        impl $name {
            pub fn index(self) -> usize {
                usize::from(self.0)
            }
        }

        impl From<u16> for $name {
            fn from(raw: u16) -> Self {
                Self(raw)
            }
        }

        impl From<$name> for usize {
            fn from(h: $name) -> usize {
                h.index()
            }
        }
    };
}

handle! {
    /// Reference to an error or return value.
    RetvalHandle
}

handle! {
    /// Reference to a pair of enter/exit delays.
    DelayHandle
}

handle! {
    /// Reference to a list of pokes.
    PokeHandle
}

/// Growable vector addressed by 16-bit handles of type `H`.
#[derive(Clone, Debug)]
pub struct Arena<T, H> {
    items: Vec<T>,
    _handle: PhantomData<H>,
}

impl<T, H> Default for Arena<T, H> {
    fn default() -> Self {
        let items = vec![];
        let _handle = PhantomData;

        Self { items, _handle }
    }
}

impl<T, H> Arena<T, H>
where
    H: Copy + From<u16> + Into<usize>,
{
    /// Append `item`, returning its handle.
    ///
    /// Panics if the handle space is exhausted.
    pub fn allocate(&mut self, item: T) -> H {
        let raw = match u16::try_from(self.items.len()) {
            Ok(raw) => raw,
            Err(_) => internal_error!("arena handle space exhausted at {} entries", self.items.len()),
        };

        self.items.push(item);

        H::from(raw)
    }

    /// Panics if `handle` was not issued by this arena.
    pub fn get(&self, handle: H) -> &T {
        let index: usize = handle.into();

        match self.items.get(index) {
            Some(item) => item,
            None => internal_error!("arena handle {} out of bounds", index),
        }
    }

    pub fn get_mut(&mut self, handle: H) -> &mut T {
        let index: usize = handle.into();

        match self.items.get_mut(index) {
            Some(item) => item,
            None => internal_error!("arena handle {} out of bounds", index),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Syscall stop at which an action applies.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Phase {
    Enter,
    Exit,
}

/// Bytes to write to the tracee memory pointed to by a syscall argument.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PokePayload {
    /// 1-based argument index, `1..=7`.
    pub arg: u8,
    pub phase: Phase,
    pub bytes: Vec<u8>,
}

/// Sleep durations on syscall entry and exit.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Delay {
    pub enter: Option<Duration>,
    pub exit: Option<Duration>,
}

impl Delay {
    pub fn get(&self, phase: Phase) -> Option<Duration> {
        match phase {
            Phase::Enter => self.enter,
            Phase::Exit => self.exit,
        }
    }

    fn slot(&mut self, phase: Phase) -> &mut Option<Duration> {
        match phase {
            Phase::Enter => &mut self.enter,
            Phase::Exit => &mut self.exit,
        }
    }
}

/// The three payload arenas referenced by compiled rules.
#[derive(Clone, Debug, Default)]
pub struct ActionStore {
    retvals: Arena<i128, RetvalHandle>,
    delays: Arena<Delay, DelayHandle>,
    pokes: Arena<Vec<PokePayload>, PokeHandle>,
}

impl ActionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_retval(&mut self, value: i128) -> RetvalHandle {
        self.retvals.allocate(value)
    }

    pub fn retval(&self, handle: RetvalHandle) -> i128 {
        *self.retvals.get(handle)
    }

    pub fn add_delay(&mut self) -> DelayHandle {
        self.delays.allocate(Delay::default())
    }

    pub fn delay(&self, handle: DelayHandle) -> Delay {
        *self.delays.get(handle)
    }

    /// Set the delay for `phase`, returning `false` if that phase is already set.
    pub fn set_delay(&mut self, handle: DelayHandle, phase: Phase, duration: Duration) -> bool {
        let slot = self.delays.get_mut(handle).slot(phase);

        if slot.is_some() {
            return false;
        }

        *slot = Some(duration);
        true
    }

    pub fn add_poke_list(&mut self) -> PokeHandle {
        self.pokes.allocate(vec![])
    }

    pub fn pokes(&self, handle: PokeHandle) -> &[PokePayload] {
        self.pokes.get(handle)
    }

    /// Append `poke` unless the list already has one for the same argument and phase.
    ///
    /// Returns `true` if appended. A duplicate is dropped, keeping the earlier payload.
    pub fn append_if_absent(&mut self, handle: PokeHandle, poke: PokePayload) -> bool {
        let list = self.pokes.get_mut(handle);

        if list.iter().any(|p| p.arg == poke.arg && p.phase == poke.phase) {
            trace!(arg = poke.arg, phase = ?poke.phase, "dropping duplicate poke");
            return false;
        }

        list.push(poke);
        true
    }
}
