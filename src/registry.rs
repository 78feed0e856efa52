//! The compiled qualifier configuration handed to a tracer.
//!
//! A [`RuleRegistry`] is built from qualifier expressions before tracing starts, then
//! shared read-only with whatever threads handle tracee stops. Every query is a total
//! function of its arguments, and needs no locking.

use std::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;
use tracing::debug;

use crate::action::ActionStore;
use crate::catalog::{Catalog, Personality};
use crate::error::{internal_error, Error, Result};
use crate::inject::{Action, InjectKind, InjectionCompiler, Rule, RuleTable};
use crate::lookup::{self, DecodeFd, DecodePid, Quiet, Secontext, Status};
use crate::number_set::{NumberSet, NumberSetArray};
use crate::qualify::{self, SpecParser};


/// Qualifier selected by the keyword before `=` in an expression.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Qualifier {
    Trace,
    TraceFd,
    Abbrev,
    Verbose,
    Raw,
    Signal,
    Status,
    Quiet,
    Read,
    Write,
    Fault,
    Inject,
    Kvm,
    DecodeFd,
    DecodePid,
    Secontext,
}

const KEYWORDS: &[(&[&str], Qualifier)] = &[
    (&["trace", "t"], Qualifier::Trace),
    (&["trace-fd", "trace-fds", "fd", "fds"], Qualifier::TraceFd),
    (&["abbrev", "a"], Qualifier::Abbrev),
    (&["verbose", "v"], Qualifier::Verbose),
    (&["raw", "x"], Qualifier::Raw),
    (&["signal", "signals", "s"], Qualifier::Signal),
    (&["status"], Qualifier::Status),
    (&["quiet", "silent", "silence", "q"], Qualifier::Quiet),
    (&["read", "reads", "r"], Qualifier::Read),
    (&["write", "writes", "w"], Qualifier::Write),
    (&["fault"], Qualifier::Fault),
    (&["inject"], Qualifier::Inject),
    (&["kvm"], Qualifier::Kvm),
    (&["decode-fd", "decode-fds"], Qualifier::DecodeFd),
    (&["decode-pid", "decode-pids"], Qualifier::DecodePid),
    (&["secontext"], Qualifier::Secontext),
];

impl Qualifier {
    /// Split `expr` into its qualifier and value.
    ///
    /// An expression with no recognized `keyword=` prefix is a `trace=` value.
    pub fn split(expr: &str) -> (Qualifier, &str) {
        if let Some(eq) = expr.find('=') {
            let keyword = &expr[..eq];

            for (names, qualifier) in KEYWORDS {
                if names.contains(&keyword) {
                    return (*qualifier, &expr[eq + 1..]);
                }
            }
        }

        (Qualifier::Trace, expr)
    }
}

bitflags! {
    /// Per-syscall qualification, as consulted on each syscall stop.
    pub struct QualFlags: u8 {
        const TRACE = 1 << 0;
        const ABBREV = 1 << 1;
        const VERBOSE = 1 << 2;
        const RAW = 1 << 3;
        const INJECT = 1 << 4;
    }
}

/// Compiled qualifier configuration.
#[derive(Debug)]
pub struct RuleRegistry {
    catalogs: Vec<Catalog>,

    trace: NumberSetArray,
    abbrev: NumberSetArray,
    verbose: NumberSetArray,
    raw: NumberSetArray,
    inject: NumberSetArray,

    /// `None` means every descriptor is traced.
    trace_fd: Option<NumberSet>,
    read: NumberSet,
    write: NumberSet,
    signals: NumberSet,

    /// `None` means every status is shown.
    status: Option<NumberSet>,
    quiet: NumberSet,
    decode_fd: NumberSet,
    decode_pid: NumberSet,
    secontext: NumberSet,
    kvm_vcpu: bool,

    rules: RuleTable,
    store: ActionStore,
}

impl RuleRegistry {
    /// Default configuration for the given personalities: trace, abbreviate, and verbosely
    /// decode every syscall; show every signal; nothing else.
    pub fn new(catalogs: Vec<Catalog>) -> Self {
        let n = catalogs.len();

        Self {
            trace: NumberSetArray::all(n),
            abbrev: NumberSetArray::all(n),
            verbose: NumberSetArray::all(n),
            raw: NumberSetArray::new(n),
            inject: NumberSetArray::new(n),
            trace_fd: None,
            read: NumberSet::new(),
            write: NumberSet::new(),
            signals: NumberSet::all(),
            status: None,
            quiet: NumberSet::new(),
            decode_fd: NumberSet::new(),
            decode_pid: NumberSet::new(),
            secontext: NumberSet::new(),
            kvm_vcpu: false,
            rules: RuleTable::new(n),
            store: ActionStore::new(),
            catalogs,
        }
    }

    /// Apply `exprs` in order on top of the defaults, stopping at the first invalid one.
    pub fn from_expressions<I, S>(catalogs: Vec<Catalog>, exprs: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut registry = Self::new(catalogs);

        for expr in exprs {
            registry.qualify(expr.as_ref())?;
        }

        Ok(registry)
    }

    /// Compile one qualifier expression, e.g. `trace=%file`, `signal=!SIGCHLD`,
    /// or `inject=read:when=3:error=EIO`.
    ///
    /// Later expressions replace the set of the same qualifier. Injection expressions
    /// accumulate, overwriting the rules of any syscall they target again.
    pub fn qualify(&mut self, expr: &str) -> Result<()> {
        let (qualifier, spec) = Qualifier::split(expr);

        let parser = SpecParser::new(&self.catalogs);

        match qualifier {
            Qualifier::Trace => self.trace = parser.syscalls(spec)?,
            Qualifier::Abbrev => self.abbrev = parser.syscalls(spec)?,
            Qualifier::Verbose => self.verbose = parser.syscalls(spec)?,
            Qualifier::Raw => self.raw = parser.syscalls(spec)?,
            Qualifier::TraceFd => {
                self.trace_fd = Some(qualify::numbers(spec, lookup::descriptor, "descriptor")?);
            },
            Qualifier::Read => self.read = qualify::numbers(spec, lookup::descriptor, "descriptor")?,
            Qualifier::Write => self.write = qualify::numbers(spec, lookup::descriptor, "descriptor")?,
            Qualifier::Signal => self.signals = qualify::numbers(spec, lookup::signal, "signal")?,
            Qualifier::Status => self.status = Some(qualify::numbers(spec, Status::lookup, "status")?),
            Qualifier::Quiet => self.quiet = qualify::numbers(spec, Quiet::lookup, "quiet")?,
            Qualifier::DecodeFd => {
                self.decode_fd = qualify::numbers(spec, DecodeFd::lookup, "decode-fd")?;
            },
            Qualifier::DecodePid => {
                self.decode_pid = qualify::numbers(spec, DecodePid::lookup, "decode-pid")?;
            },
            Qualifier::Secontext => {
                self.secontext = qualify::numbers(spec, Secontext::lookup, "secontext")?;
            },
            Qualifier::Kvm => {
                if spec != "vcpu" {
                    return Err(Error::invalid("kvm", spec));
                }

                self.kvm_vcpu = true;
            },
            Qualifier::Fault => self.compile_injection(InjectKind::Fault, spec)?,
            Qualifier::Inject => self.compile_injection(InjectKind::Inject, spec)?,
        }

        debug!(?qualifier, spec, "qualified");

        Ok(())
    }

    fn compile_injection(&mut self, kind: InjectKind, spec: &str) -> Result<()> {
        let parser = SpecParser::new(&self.catalogs);
        let injection = InjectionCompiler::new(parser, &mut self.store).compile(kind, spec)?;

        self.rules.apply(&self.catalogs, &injection, &mut self.inject);

        Ok(())
    }

    /// Make `value` a quiet-set member, on top of any `quiet=` expression.
    pub fn add_quiet(&mut self, value: Quiet) {
        debug!(?value, "merging into quiet set");
        self.quiet.include(value.into());
    }

    /// Make `value` a decode-fd-set member, on top of any `decode-fd=` expression.
    pub fn add_decode_fd(&mut self, value: DecodeFd) {
        debug!(?value, "merging into decode-fd set");
        self.decode_fd.include(value.into());
    }

    pub fn catalogs(&self) -> &[Catalog] {
        &self.catalogs
    }

    pub fn catalog(&self, p: Personality) -> &Catalog {
        match self.catalogs.get(p.index()) {
            Some(catalog) => catalog,
            None => internal_error!("personality {} has no catalog", p),
        }
    }

    pub fn store(&self) -> &ActionStore {
        &self.store
    }

    /// Qualification of syscall `n` for a tracee in personality `p`.
    pub fn qual_flags(&self, p: Personality, n: u32) -> QualFlags {
        let mut flags = QualFlags::empty();

        for (set, flag) in [
            (&self.trace, QualFlags::TRACE),
            (&self.abbrev, QualFlags::ABBREV),
            (&self.verbose, QualFlags::VERBOSE),
            (&self.raw, QualFlags::RAW),
            (&self.inject, QualFlags::INJECT),
        ] {
            if set.contains(n, p) {
                flags |= flag;
            }
        }

        flags
    }

    /// Injection rule for syscall `n` of personality `p`, regardless of occurrence.
    pub fn lookup_rule(&self, p: Personality, n: u32) -> Option<&Rule> {
        self.rules.get(p, n)
    }

    /// Record an invocation of syscall `n`, returning its rule if this occurrence fires.
    ///
    /// Only syscalls with a rule are counted.
    pub fn should_inject(&self, p: Personality, n: u32, occurrences: &Occurrences) -> Option<&Rule> {
        let rule = self.lookup_rule(p, n)?;
        let k = occurrences.record(p, n);

        if rule.matches(k) {
            Some(rule)
        } else {
            None
        }
    }

    /// Resolve `rule`'s payloads.
    pub fn actions(&self, rule: &Rule) -> Vec<Action<'_>> {
        rule.actions(&self.store)
    }

    pub fn traces_fd(&self, fd: u32) -> bool {
        self.trace_fd.as_ref().map(|set| set.contains(fd)).unwrap_or(true)
    }

    pub fn dumps_read(&self, fd: u32) -> bool {
        self.read.contains(fd)
    }

    pub fn dumps_write(&self, fd: u32) -> bool {
        self.write.contains(fd)
    }

    pub fn traces_signal(&self, signal: u32) -> bool {
        self.signals.contains(signal)
    }

    pub fn shows_status(&self, status: Status) -> bool {
        self.status
            .as_ref()
            .map(|set| set.contains(status.into()))
            .unwrap_or(true)
    }

    pub fn is_quiet(&self, value: Quiet) -> bool {
        self.quiet.contains(value.into())
    }

    pub fn decodes_fd(&self, value: DecodeFd) -> bool {
        self.decode_fd.contains(value.into())
    }

    pub fn decodes_pid(&self, value: DecodePid) -> bool {
        self.decode_pid.contains(value.into())
    }

    pub fn secontext(&self, value: Secontext) -> bool {
        self.secontext.contains(value.into())
    }

    pub fn kvm_vcpu(&self) -> bool {
        self.kvm_vcpu
    }
}

/// Per-(personality, syscall) invocation counters that drive `when=` matching.
///
/// Counters are atomic, so one instance may be shared by every thread handling a tracee
/// that should see the same occurrence sequence.
#[derive(Debug)]
pub struct Occurrences {
    counts: Vec<Vec<AtomicU32>>,
}

impl Occurrences {
    /// Zeroed counters shaped after `catalogs`.
    pub fn new(catalogs: &[Catalog]) -> Self {
        let counts = catalogs
            .iter()
            .map(|c| (0..c.len()).map(|_| AtomicU32::new(0)).collect())
            .collect();

        Self { counts }
    }

    /// Count one more invocation of syscall `n`, returning the new count (from 1).
    pub fn record(&self, p: Personality, n: u32) -> u32 {
        let counter = self.counter(p, n);

        let prev = counter
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |k| Some(k.saturating_add(1)))
            .unwrap_or_else(|k| k);

        prev.saturating_add(1)
    }

    pub fn count(&self, p: Personality, n: u32) -> u32 {
        self.counter(p, n).load(Ordering::Relaxed)
    }

    fn counter(&self, p: Personality, n: u32) -> &AtomicU32 {
        match self.counts.get(p.index()).and_then(|c| c.get(n as usize)) {
            Some(counter) => counter,
            None => internal_error!("occurrence counter ({}, {}) out of bounds", p, n),
        }
    }
}
