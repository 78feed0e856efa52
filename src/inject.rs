//! Fault-injection rules: parsing `fault=` and `inject=` expressions, and the dense
//! per-personality rule table they compile into.
//!
//! An expression is a syscall qualifier followed by `:`-separated directives:
//!
//! ```text
//! read:when=2..4:error=EACCES
//! openat@64:retval=0:poke_exit=@arg2=2f746d70
//! ```

use std::convert::TryFrom;
use std::time::Duration;

use bitflags::bitflags;
use tracing::debug;

use crate::action::{ActionStore, DelayHandle, Phase, PokeHandle, PokePayload, RetvalHandle, MAX_POKE_BYTES};
use crate::catalog::{Catalog, Personality, SyscallFlags};
use crate::error::{internal_error, Error, Result};
use crate::lookup;
use crate::number_set::NumberSetArray;
use crate::qualify::SpecParser;


/// Largest accepted `when=` occurrence or step value.
pub const MAX_OCCURRENCE: u16 = u16::MAX;

/// Which of the two expression forms is being compiled.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum InjectKind {
    /// `fault=`: error injection only, defaulting to `ENOSYS`.
    Fault,

    /// `inject=`: the general form. At least one action is required.
    Inject,
}

impl InjectKind {
    pub fn name(self) -> &'static str {
        match self {
            InjectKind::Fault => "fault",
            InjectKind::Inject => "inject",
        }
    }
}

/// Occurrence range of a rule: which invocations of a syscall it fires on.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct When {
    /// First matching occurrence, counting from 1.
    pub first: u16,

    /// Last matching occurrence, or `None` if unbounded.
    pub last: Option<u16>,

    /// Distance between matching occurrences. Zero means only `first` matches.
    pub step: u16,
}

impl Default for When {
    fn default() -> Self {
        Self { first: 1, last: None, step: 1 }
    }
}

impl When {
    /// Parse `F`, `F+`, `F+S`, `F..L`, or `F..L+S`.
    pub fn parse(s: &str) -> Option<Self> {
        let (range, step) = match s.find('+') {
            Some(plus) => (&s[..plus], Some(&s[plus + 1..])),
            None => (s, None),
        };

        let (first, last) = match range.find("..") {
            Some(dots) => (&range[..dots], Some(&range[dots + 2..])),
            None => (range, None),
        };

        let first = occurrence(first).filter(|&f| f >= 1)?;

        let last = match last {
            // The maximum is reserved to mean "unbounded".
            Some(last) => Some(occurrence(last).filter(|&l| l >= first && l != MAX_OCCURRENCE)?),
            None => None,
        };

        let step = match step {
            Some("") => 1,
            Some(step) => occurrence(step).filter(|&s| s >= 1)?,
            None if last.is_some() => 1,
            None => 0,
        };

        Some(Self { first, last, step })
    }

    /// True if the `k`-th invocation (counting from 1) is selected.
    pub fn matches(&self, k: u32) -> bool {
        let first = u32::from(self.first);

        if k < first {
            return false;
        }

        if let Some(last) = self.last {
            if k > u32::from(last) {
                return false;
            }
        }

        match self.step {
            0 => k == first,
            step => (k - first) % u32::from(step) == 0,
        }
    }
}

fn occurrence(s: &str) -> Option<u16> {
    lookup::uint_upto(s, u32::from(MAX_OCCURRENCE)).map(|n| n as u16)
}

bitflags! {
    /// Actions a rule carries.
    pub struct ActionFlags: u16 {
        const ERROR = 1 << 0;
        const RETVAL = 1 << 1;
        const SIGNAL = 1 << 2;
        const SYSCALL = 1 << 3;
        const POKE_ENTER = 1 << 4;
        const POKE_EXIT = 1 << 5;
        const DELAY_ENTER = 1 << 6;
        const DELAY_EXIT = 1 << 7;
    }
}

/// Compiled injection rule for one (personality, syscall) slot.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Rule {
    pub when: When,
    pub actions: ActionFlags,

    /// Errno (for [`ActionFlags::ERROR`]) or return value (for [`ActionFlags::RETVAL`]).
    pub error_or_retval: Option<RetvalHandle>,

    /// Signal to deliver, or `0`.
    pub signal: u8,

    /// Syscall number to run instead, in this slot's personality.
    pub syscall_redirect: Option<u16>,

    pub poke: Option<PokeHandle>,
    pub delay: Option<DelayHandle>,
}

impl Rule {
    pub fn matches(&self, k: u32) -> bool {
        self.when.matches(k)
    }

    /// Resolve this rule's actions against the arenas that hold their payloads.
    pub fn actions<'s>(&self, store: &'s ActionStore) -> Vec<Action<'s>> {
        let mut actions = vec![];

        if let Some(h) = self.error_or_retval {
            let value = store.retval(h);

            if self.actions.contains(ActionFlags::ERROR) {
                actions.push(Action::Error(value as u16));
            } else if self.actions.contains(ActionFlags::RETVAL) {
                actions.push(Action::Retval(value));
            }
        }

        if self.actions.contains(ActionFlags::SIGNAL) {
            actions.push(Action::Signal(self.signal));
        }

        if let Some(nr) = self.syscall_redirect {
            actions.push(Action::Syscall(nr));
        }

        if let Some(h) = self.poke {
            actions.extend(store.pokes(h).iter().map(Action::Poke));
        }

        if let Some(h) = self.delay {
            let delay = store.delay(h);

            if let Some(d) = delay.enter {
                actions.push(Action::DelayEnter(d));
            }

            if let Some(d) = delay.exit {
                actions.push(Action::DelayExit(d));
            }
        }

        actions
    }
}

/// A resolved rule action, for the tracer to carry out.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Action<'s> {
    /// Fail the syscall with this errno.
    Error(u16),

    /// Skip the syscall, returning this value.
    Retval(i128),

    /// Deliver this signal.
    Signal(u8),

    /// Run this syscall number instead.
    Syscall(u16),

    /// Write bytes through a pointer argument.
    Poke(&'s PokePayload),

    DelayEnter(Duration),
    DelayExit(Duration),
}

/// A compiled `fault=`/`inject=` expression, ready to be written into a [`RuleTable`].
#[derive(Clone, Debug)]
pub struct Injection {
    pub targets: NumberSetArray,
    pub rule: Rule,

    /// Per-personality `syscall=` target numbers.
    pub redirect: Vec<Option<u16>>,
}

// Directive values parsed from an expression, before any arena allocation.
#[derive(Debug, Default)]
struct Directives {
    when: Option<When>,
    error: Option<u32>,
    retval: Option<i128>,
    signal: Option<u8>,
    redirect: Option<Vec<u16>>,
    pokes: Vec<PokePayload>,
    delay_enter: Option<Duration>,
    delay_exit: Option<Duration>,
}

impl Directives {
    fn has_action(&self) -> bool {
        self.error.is_some()
            || self.retval.is_some()
            || self.signal.is_some()
            || !self.pokes.is_empty()
            || self.delay_enter.is_some()
            || self.delay_exit.is_some()
    }
}

/// Compiles `fault=` and `inject=` expressions, storing payloads in an [`ActionStore`].
#[derive(Debug)]
pub struct InjectionCompiler<'a> {
    parser: SpecParser<'a>,
    store: &'a mut ActionStore,
}

impl<'a> InjectionCompiler<'a> {
    pub fn new(parser: SpecParser<'a>, store: &'a mut ActionStore) -> Self {
        Self { parser, store }
    }

    pub fn compile(&mut self, kind: InjectKind, expr: &str) -> Result<Injection> {
        let mut tokens = expr.split(':');
        let spec = tokens.next().unwrap_or_default();

        let targets = self.parser.syscalls(spec)?;

        let mut directives = Directives::default();

        for token in tokens {
            self.directive(kind, expr, token, &mut directives)?;
        }

        if directives.error.is_some() && directives.retval.is_some() {
            return Err(Error::ErrorAndRetval { expr: expr.to_owned() });
        }

        match kind {
            InjectKind::Fault => {
                if directives.error.is_none() {
                    directives.error = Some(libc::ENOSYS as u32);
                }
            },
            InjectKind::Inject => {
                if !directives.has_action() {
                    return Err(Error::NoAction { expr: expr.to_owned() });
                }
            },
        }

        let (rule, redirect) = self.build(directives);

        debug!(kind = kind.name(), expr, ?rule, "compiled injection");

        Ok(Injection { targets, rule, redirect })
    }

    fn directive(&self, kind: InjectKind, expr: &str, token: &str, d: &mut Directives) -> Result<()> {
        let invalid = || Error::directive(kind.name(), token);
        let duplicate = |directive: &'static str| Error::Duplicate {
            kind: kind.name(),
            directive,
            expr: expr.to_owned(),
        };
        let not_fault = |directive: &'static str| Error::NotFault {
            directive,
            expr: expr.to_owned(),
        };

        let (key, val) = match token.find('=') {
            Some(eq) => (&token[..eq], &token[eq + 1..]),
            None => return Err(invalid()),
        };

        if kind == InjectKind::Fault {
            if let Some(&directive) = INJECT_ONLY.iter().find(|&&d| d == key) {
                return Err(not_fault(directive));
            }
        }

        match key {
            "when" => {
                if d.when.is_some() {
                    return Err(duplicate("when"));
                }

                d.when = Some(When::parse(val).ok_or_else(invalid)?);
            },
            "error" => {
                if d.error.is_some() {
                    return Err(duplicate("error"));
                }

                d.error = Some(lookup::errno(val).ok_or_else(invalid)?);
            },
            "retval" => {
                if d.retval.is_some() {
                    return Err(duplicate("retval"));
                }

                d.retval = Some(parse_retval(val).ok_or_else(invalid)?);
            },
            "signal" => {
                if d.signal.is_some() {
                    return Err(duplicate("signal"));
                }

                let signal = lookup::signal(val)
                    .filter(|&n| (1..=lookup::NSIG_BYTES * 8).contains(&n))
                    .ok_or_else(invalid)?;

                d.signal = Some(signal as u8);
            },
            "syscall" => {
                if d.redirect.is_some() {
                    return Err(duplicate("syscall"));
                }

                d.redirect = Some(self.redirect(val, invalid)?);
            },
            "poke_enter" | "poke_exit" => {
                let phase = if key == "poke_enter" { Phase::Enter } else { Phase::Exit };
                parse_pokes(phase, val, &mut d.pokes).ok_or_else(invalid)?;
            },
            "delay_enter" | "delay_exit" => {
                let (slot, directive) = if key == "delay_enter" {
                    (&mut d.delay_enter, "delay_enter")
                } else {
                    (&mut d.delay_exit, "delay_exit")
                };

                if slot.is_some() {
                    return Err(duplicate(directive));
                }

                *slot = Some(parse_duration(val).ok_or_else(invalid)?);
            },
            _ => return Err(invalid()),
        }

        Ok(())
    }

    // Resolve a `syscall=` target in every personality. It must exist and be pure in each.
    fn redirect(&self, name: &str, invalid: impl Fn() -> Error) -> Result<Vec<u16>> {
        let mut numbers = vec![];

        for catalog in self.parser.catalogs() {
            let n = catalog.lookup(name).next().ok_or_else(&invalid)?;

            if !catalog.flags(n).contains(SyscallFlags::PURE) {
                return Err(Error::Impure { name: name.to_owned() });
            }

            let n = u16::try_from(n).map_err(|_| invalid())?;
            numbers.push(n);
        }

        Ok(numbers)
    }

    // Allocate payloads and assemble the rule shared by every target slot.
    fn build(&mut self, d: Directives) -> (Rule, Vec<Option<u16>>) {
        let mut actions = ActionFlags::empty();

        let error_or_retval = if let Some(errno) = d.error {
            actions |= ActionFlags::ERROR;
            Some(self.store.add_retval(i128::from(errno)))
        } else if let Some(retval) = d.retval {
            actions |= ActionFlags::RETVAL;
            Some(self.store.add_retval(retval))
        } else {
            None
        };

        let signal = match d.signal {
            Some(signal) => {
                actions |= ActionFlags::SIGNAL;
                signal
            },
            None => 0,
        };

        let redirect = match d.redirect {
            Some(numbers) => {
                actions |= ActionFlags::SYSCALL;
                numbers.into_iter().map(Some).collect()
            },
            None => vec![None; self.parser.catalogs().len()],
        };

        let poke = if d.pokes.is_empty() {
            None
        } else {
            let h = self.store.add_poke_list();

            for poke in d.pokes {
                actions |= match poke.phase {
                    Phase::Enter => ActionFlags::POKE_ENTER,
                    Phase::Exit => ActionFlags::POKE_EXIT,
                };

                self.store.append_if_absent(h, poke);
            }

            Some(h)
        };

        let delay = if d.delay_enter.is_none() && d.delay_exit.is_none() {
            None
        } else {
            let h = self.store.add_delay();

            for (phase, duration, flag) in [
                (Phase::Enter, d.delay_enter, ActionFlags::DELAY_ENTER),
                (Phase::Exit, d.delay_exit, ActionFlags::DELAY_EXIT),
            ] {
                if let Some(duration) = duration {
                    actions |= flag;
                    self.store.set_delay(h, phase, duration);
                }
            }

            Some(h)
        };

        let rule = Rule {
            when: d.when.unwrap_or_default(),
            actions,
            error_or_retval,
            signal,
            syscall_redirect: None,
            poke,
            delay,
        };

        (rule, redirect)
    }
}

// Directives rejected in `fault=` expressions.
const INJECT_ONLY: &[&str] = &[
    "retval",
    "signal",
    "poke_enter",
    "poke_exit",
    "delay_enter",
    "delay_exit",
];

fn parse_retval(s: &str) -> Option<i128> {
    let digits = s.strip_prefix('-').unwrap_or(s);

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let value: i128 = s.parse().ok()?;

    if value < i128::from(i64::MIN) || value > i128::from(u64::MAX) {
        return None;
    }

    Some(value)
}

// Parse `@argN=HEX[,@argN=HEX]...` into `pokes`.
//
// An entry may restate a `poke_enter=`/`poke_exit=` key, switching the phase for itself
// and the entries after it.
fn parse_pokes(mut phase: Phase, s: &str, pokes: &mut Vec<PokePayload>) -> Option<()> {
    for entry in s.split(',') {
        let entry = if let Some(rest) = entry.strip_prefix("poke_enter=") {
            phase = Phase::Enter;
            rest
        } else if let Some(rest) = entry.strip_prefix("poke_exit=") {
            phase = Phase::Exit;
            rest
        } else {
            entry
        };

        let rest = entry.strip_prefix("@arg")?;
        let mut chars = rest.chars();

        let arg = chars.next()?.to_digit(10).filter(|n| (1..=7).contains(n))?;

        let hex = chars.as_str().strip_prefix('=')?;
        let bytes = decode_hex(hex)?;

        pokes.push(PokePayload { arg: arg as u8, phase, bytes });
    }

    Some(())
}

fn decode_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.is_empty() || hex.len() % 2 != 0 || hex.len() > 2 * MAX_POKE_BYTES {
        return None;
    }

    hex.as_bytes()
        .chunks(2)
        .map(|pair| {
            let hi = (pair[0] as char).to_digit(16)?;
            let lo = (pair[1] as char).to_digit(16)?;
            Some((hi << 4 | lo) as u8)
        })
        .collect()
}

/// Parse a delay such as `10ms`, `1.5s`, or `250` (microseconds).
fn parse_duration(s: &str) -> Option<Duration> {
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);

    let scale: u128 = match unit {
        "s" => 1_000_000_000,
        "ms" => 1_000_000,
        "us" | "" => 1_000,
        "ns" => 1,
        _ => return None,
    };

    let (whole, fraction) = match number.find('.') {
        Some(dot) => (&number[..dot], &number[dot + 1..]),
        None => (number, ""),
    };

    if whole.is_empty() || fraction.contains('.') {
        return None;
    }

    let mut nanos = whole.parse::<u128>().ok()?.checked_mul(scale)?;

    let mut place = scale;
    for digit in fraction.chars() {
        place /= 10;
        nanos = nanos.checked_add(u128::from(digit.to_digit(10)?) * place)?;
    }

    u64::try_from(nanos).ok().map(Duration::from_nanos)
}

/// Dense rule table: one optional [`Rule`] per (personality, syscall number).
#[derive(Clone, Debug, Default)]
pub struct RuleTable {
    rules: Vec<Vec<Option<Rule>>>,
}

impl RuleTable {
    pub fn new(personalities: usize) -> Self {
        let rules = vec![vec![]; personalities];
        Self { rules }
    }

    /// Write `injection`'s rule into every targeted slot, replacing any earlier rule.
    ///
    /// Every slot written is also added to `inject_set`.
    pub fn apply(&mut self, catalogs: &[Catalog], injection: &Injection, inject_set: &mut NumberSetArray) {
        for (p, set) in injection.targets.iter() {
            if set.is_empty() {
                continue;
            }

            let len = catalogs[p.index()].len();
            let slots = &mut self.rules[p.index()];

            if slots.is_empty() {
                slots.resize(len as usize, None);
            }

            for n in (0..len).filter(|&n| set.contains(n)) {
                let mut rule = injection.rule.clone();
                rule.syscall_redirect = injection.redirect[p.index()];

                inject_set.add(n, p);

                if slots[n as usize].replace(rule).is_some() {
                    debug!(personality = p.index(), scno = n, "overwriting injection rule");
                }
            }
        }
    }

    /// Rule for syscall `n` of personality `p`, if one was compiled.
    pub fn get(&self, p: Personality, n: u32) -> Option<&Rule> {
        match self.rules.get(p.index()) {
            Some(slots) => slots.get(n as usize).and_then(Option::as_ref),
            None => internal_error!("personality {} out of rule table bounds", p),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.iter().all(|slots| slots.iter().all(Option::is_none))
    }
}
