use anyhow::Result;
use structopt::StructOpt;
use sysqual::{Catalog, Occurrences, Personality, RuleRegistry};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Compile qualifier expressions for the host ABI and show what they select.
#[derive(StructOpt, Debug)]
struct Opt {
    /// Qualifier expression, e.g. `trace=%file` or `inject=read:when=2:error=EIO`.
    #[structopt(short = "e", long = "expr", number_of_values = 1)]
    exprs: Vec<String>,

    /// Log compilation steps. Repeat for more detail.
    #[structopt(short, long, parse(from_occurrences))]
    verbose: u8,

    /// Invocations of each injected syscall to simulate.
    #[structopt(short, long, default_value = "5")]
    calls: u32,

    /// Syscalls to report on. Defaults to every syscall with a rule.
    names: Vec<String>,
}

fn main() -> Result<()> {
    let opt = Opt::from_args();

    let level = match opt.verbose {
        0 => Level::WARN,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let registry = RuleRegistry::from_expressions(vec![Catalog::native()], &opt.exprs)?;

    let p = Personality::NATIVE;
    let catalog = registry.catalog(p);

    let numbers: Vec<u32> = if opt.names.is_empty() {
        catalog
            .entries()
            .map(|(n, _)| n)
            .filter(|&n| registry.lookup_rule(p, n).is_some())
            .collect()
    } else {
        let mut numbers = vec![];

        for name in &opt.names {
            let found: Vec<u32> = catalog.lookup(name).collect();

            if found.is_empty() {
                anyhow::bail!("unknown syscall '{}'", name);
            }

            numbers.extend(found);
        }

        numbers
    };

    let occurrences = Occurrences::new(registry.catalogs());

    for n in numbers {
        let name = catalog.name(n).unwrap_or("?");

        println!("{:>4} {:<20} {:?}", n, name, registry.qual_flags(p, n));

        if let Some(rule) = registry.lookup_rule(p, n) {
            println!("     when = {:?}", rule.when);

            for action in registry.actions(rule) {
                println!("     {:?}", action);
            }

            let fired: Vec<u32> = (1..=opt.calls)
                .filter(|_| registry.should_inject(p, n, &occurrences).is_some())
                .collect();

            println!("     fires on {:?} of {} calls", fired, opt.calls);
        }
    }

    Ok(())
}
