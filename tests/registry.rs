use std::sync::Arc;
use std::thread;

use anyhow::Result;
use pretty_assertions::assert_eq;

use sysqual::lookup::{DecodeFd, DecodePid, Quiet, Secontext, Status};
use sysqual::{Error, Occurrences, QualFlags, Qualifier, RuleRegistry};

#[macro_use]
#[allow(unused)]
mod support;
use support::*;

#[test]
fn test_keyword_split() {
    let cases = &[
        ("trace=open", Qualifier::Trace, "open"),
        ("t=open", Qualifier::Trace, "open"),
        ("open", Qualifier::Trace, "open"),
        ("%file", Qualifier::Trace, "%file"),
        ("fds=3", Qualifier::TraceFd, "3"),
        ("trace-fd=3", Qualifier::TraceFd, "3"),
        ("a=none", Qualifier::Abbrev, "none"),
        ("v=all", Qualifier::Verbose, "all"),
        ("x=read", Qualifier::Raw, "read"),
        ("signals=!SIGCHLD", Qualifier::Signal, "!SIGCHLD"),
        ("silence=attach", Qualifier::Quiet, "attach"),
        ("r=1", Qualifier::Read, "1"),
        ("writes=2", Qualifier::Write, "2"),
        ("fault=open:error=EIO", Qualifier::Fault, "open:error=EIO"),
        ("inject=open:retval=0", Qualifier::Inject, "open:retval=0"),
        ("kvm=vcpu", Qualifier::Kvm, "vcpu"),
        ("decode-fds=path", Qualifier::DecodeFd, "path"),
        ("decode-pids=comm", Qualifier::DecodePid, "comm"),
        ("secontext=full", Qualifier::Secontext, "full"),
        // Only the exact keyword counts.
        ("traces=open", Qualifier::Trace, "traces=open"),
    ];

    for &(expr, qualifier, value) in cases {
        assert_eq!(Qualifier::split(expr), (qualifier, value), "{}", expr);
    }
}

#[test]
fn test_defaults() -> Result<()> {
    let registry = RuleRegistry::new(catalogs());

    for &p in &[P64, P32, X32] {
        for &n in &[0, 2, 100, 5000] {
            assert_eq!(
                registry.qual_flags(p, n),
                QualFlags::TRACE | QualFlags::ABBREV | QualFlags::VERBOSE,
            );
            assert!(registry.lookup_rule(p, n).is_none());
        }
    }

    assert!(registry.traces_fd(0));
    assert!(registry.traces_fd(1 << 20));
    assert!(!registry.dumps_read(0));
    assert!(!registry.dumps_write(1));
    assert!(registry.traces_signal(libc::SIGCHLD as u32));
    assert!(registry.shows_status(Status::Failed));
    assert!(!registry.is_quiet(Quiet::Attach));
    assert!(!registry.decodes_fd(DecodeFd::Path));
    assert!(!registry.decodes_pid(DecodePid::Comm));
    assert!(!registry.secontext(Secontext::Full));
    assert!(!registry.kvm_vcpu());

    // No expressions leaves the defaults.
    let compiled = RuleRegistry::from_expressions(catalogs(), Vec::<&str>::new())?;
    assert_eq!(compiled.qual_flags(P64, 0), registry.qual_flags(P64, 0));
    Ok(())
}

#[test]
fn test_qual_flags() -> Result<()> {
    let registry = registry!(
        "trace=%file",
        "abbrev=none",
        "verbose=!open",
        "raw=read",
        "inject=open:error=EPERM",
    )?;

    assert_eq!(
        registry.qual_flags(P64, 2),
        QualFlags::TRACE | QualFlags::INJECT,
    );
    assert_eq!(registry.qual_flags(P64, 0), QualFlags::VERBOSE | QualFlags::RAW);
    assert_eq!(registry.qual_flags(P32, 3), QualFlags::VERBOSE | QualFlags::RAW);
    assert_eq!(
        registry.qual_flags(P32, 106),
        QualFlags::TRACE | QualFlags::VERBOSE,
    );

    // Past every catalog only complemented sets still match.
    assert_eq!(registry.qual_flags(X32, 9999), QualFlags::VERBOSE);
    Ok(())
}

#[test]
fn test_later_expression_replaces_set() -> Result<()> {
    let registry = registry!("trace=open", "trace=close")?;

    assert!(!registry.qual_flags(P64, 2).contains(QualFlags::TRACE));
    assert!(registry.qual_flags(P64, 3).contains(QualFlags::TRACE));
    Ok(())
}

#[test]
fn test_first_invalid_expression_fails() {
    let err = registry!("trace=open", "trace=nosuch", "bogus=").unwrap_err();

    assert_eq!(err, Error::Invalid { kind: "system call", token: "nosuch".into() });
}

#[test]
fn test_descriptor_sets() -> Result<()> {
    let registry = registry!("trace-fd=3,5", "read=0", "write=!1")?;

    assert!(registry.traces_fd(3));
    assert!(!registry.traces_fd(4));
    assert!(registry.dumps_read(0));
    assert!(!registry.dumps_read(1));
    assert!(!registry.dumps_write(1));
    assert!(registry.dumps_write(2));

    assert!(registry!("read=stdin").is_err());
    Ok(())
}

#[test]
fn test_signal_set() -> Result<()> {
    let registry = registry!("signal=!SIGCHLD,SIGPIPE")?;

    assert!(!registry.traces_signal(libc::SIGCHLD as u32));
    assert!(!registry.traces_signal(libc::SIGPIPE as u32));
    assert!(registry.traces_signal(libc::SIGTERM as u32));

    let registry = registry!("s=none")?;
    assert!(!registry.traces_signal(libc::SIGTERM as u32));
    Ok(())
}

#[test]
fn test_status_set() -> Result<()> {
    let registry = registry!("status=failed,unfinished")?;

    assert!(registry.shows_status(Status::Failed));
    assert!(registry.shows_status(Status::Unfinished));
    assert!(!registry.shows_status(Status::Successful));
    assert!(!registry.shows_status(Status::Detached));

    let err = registry!("status=bogus").unwrap_err();
    assert_eq!(err.to_string(), "invalid status 'bogus'");
    Ok(())
}

#[test]
fn test_named_value_sets() -> Result<()> {
    let registry = registry!(
        "quiet=exits,superseded",
        "decode-fd=path,socket",
        "decode-pid=pidns",
        "secontext=!full",
    )?;

    assert!(registry.is_quiet(Quiet::Exit));
    assert!(registry.is_quiet(Quiet::ThreadExecve));
    assert!(!registry.is_quiet(Quiet::Attach));
    assert!(registry.decodes_fd(DecodeFd::Socket));
    assert!(!registry.decodes_fd(DecodeFd::Dev));
    assert!(registry.decodes_pid(DecodePid::Pidns));
    assert!(!registry.decodes_pid(DecodePid::Comm));
    assert!(!registry.secontext(Secontext::Full));
    assert!(registry.secontext(Secontext::Mismatch));
    Ok(())
}

#[test]
fn test_merge_into_complemented_set() -> Result<()> {
    let mut registry = registry!("quiet=!attach,personality", "decode-fd=!path")?;

    assert!(!registry.is_quiet(Quiet::Attach));
    registry.add_quiet(Quiet::Attach);
    assert!(registry.is_quiet(Quiet::Attach));
    assert!(!registry.is_quiet(Quiet::Personality));
    assert!(registry.is_quiet(Quiet::Exit));

    registry.add_decode_fd(DecodeFd::Path);
    assert!(registry.decodes_fd(DecodeFd::Path));
    assert!(registry.decodes_fd(DecodeFd::Pidfd));

    // Merging an existing member changes nothing.
    registry.add_quiet(Quiet::Exit);
    assert!(registry.is_quiet(Quiet::Exit));
    Ok(())
}

#[test]
fn test_merge_into_plain_set() {
    let mut registry = RuleRegistry::new(catalogs());

    registry.add_quiet(Quiet::PathResolution);
    assert!(registry.is_quiet(Quiet::PathResolution));
    assert!(!registry.is_quiet(Quiet::Exit));
}

#[test]
fn test_kvm() -> Result<()> {
    assert!(registry!("kvm=vcpu")?.kvm_vcpu());

    let err = registry!("kvm=all").unwrap_err();
    assert_eq!(err, Error::Invalid { kind: "kvm", token: "all".into() });
    Ok(())
}

#[test]
fn test_occurrences_only_count_rule_slots() -> Result<()> {
    let registry = registry!("inject=read:when=2:error=EIO")?;
    let occurrences = Occurrences::new(registry.catalogs());

    assert!(registry.should_inject(P64, 0, &occurrences).is_none());
    assert!(registry.should_inject(P64, 0, &occurrences).is_some());
    assert!(registry.should_inject(P64, 0, &occurrences).is_none());
    assert_eq!(occurrences.count(P64, 0), 3);

    for _ in 0..3 {
        assert!(registry.should_inject(P64, 1, &occurrences).is_none());
    }
    assert_eq!(occurrences.count(P64, 1), 0);

    // Each personality counts separately.
    assert_eq!(occurrences.count(P32, 3), 0);
    assert!(registry.should_inject(P32, 3, &occurrences).is_none());
    assert!(registry.should_inject(P32, 3, &occurrences).is_some());
    Ok(())
}

#[test]
fn test_occurrences_shared_between_threads() -> Result<()> {
    const THREADS: u32 = 8;
    const CALLS: u32 = 1000;

    let registry = Arc::new(registry!("inject=read:when=500..1500:retval=0")?);
    let occurrences = Arc::new(Occurrences::new(registry.catalogs()));

    let handles = (0..THREADS)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let occurrences = Arc::clone(&occurrences);

            thread::spawn(move || {
                (0..CALLS)
                    .filter(|_| registry.should_inject(P64, 0, &occurrences).is_some())
                    .count()
            })
        })
        .collect::<Vec<_>>();

    let mut fired = 0;
    for handle in handles {
        fired += handle.join().expect("thread panicked");
    }

    // Every invocation got a distinct occurrence number.
    assert_eq!(occurrences.count(P64, 0), THREADS * CALLS);
    assert_eq!(fired, 1001);
    Ok(())
}

#[test]
fn test_registry_is_shareable() {
    fn assert_send_sync<T: Send + Sync>() {}

    assert_send_sync::<RuleRegistry>();
    assert_send_sync::<Occurrences>();
}
