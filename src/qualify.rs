//! Compile qualifier expressions into number sets.
//!
//! An expression is a comma-separated token list, optionally preceded by any number of
//! `!` (each one complements the result), or one of the literals `none` and `all`.
//!
//! Syscall tokens are resolved against every personality's [`Catalog`]:
//!
//! - `?` prefixes (any number) allow the token to match nothing
//! - an `@designator` suffix restricts the token to one personality. It is split off at
//!   the last `@` before the token form is known, so a regex cannot contain `@`
//! - `123` is a syscall number
//! - `/re/` is a POSIX extended regex matched against every syscall name
//! - `%class` (or a legacy bare class name) selects by catalog flags
//! - anything else is a syscall name, which may match several numbers

use tracing::trace;

use crate::catalog::{lookup_class, Catalog, Personality};
use crate::error::{Error, Result};
use crate::number_set::{NumberSet, NumberSetArray};
use crate::posix_regex::PosixRegex;


pub(crate) const SYSCALL: &str = "system call";

/// Qualifier compiler bound to the catalogs of every supported personality.
#[derive(Clone, Copy, Debug)]
pub struct SpecParser<'a> {
    catalogs: &'a [Catalog],
}

impl<'a> SpecParser<'a> {
    pub fn new(catalogs: &'a [Catalog]) -> Self {
        Self { catalogs }
    }

    pub fn catalogs(&self) -> &'a [Catalog] {
        self.catalogs
    }

    /// Compile a syscall qualifier into one set per personality.
    pub fn syscalls(&self, spec: &str) -> Result<NumberSetArray> {
        let mut set = NumberSetArray::new(self.catalogs.len());

        let rest = strip_negations(spec, || set.invert());

        match rest {
            "none" => return Ok(set),
            "all" => {
                set.invert();
                return Ok(set);
            },
            _ => {},
        }

        let mut done = false;

        for token in rest.split(',').filter(|t| !t.is_empty()) {
            self.syscall_token(token, &mut set)?;
            done = true;
        }

        if !done {
            return Err(Error::invalid(SYSCALL, spec));
        }

        Ok(set)
    }

    fn syscall_token(&self, token: &str, set: &mut NumberSetArray) -> Result<()> {
        let body = token.trim_start_matches('?');
        let optional = body.len() != token.len();

        let (body, personalities) = self.split_personality(body, token)?;

        let matched = if body.starts_with(|c: char| c.is_ascii_digit()) {
            self.number(body, &personalities, set)
        } else if let Some(pattern) = body.strip_prefix('/') {
            self.regex(pattern, &personalities, set)?
        } else if let Some(matched) = self.class(body, &personalities, set) {
            matched
        } else {
            self.name(body, &personalities, set)
        };

        trace!(token, matched, "resolved syscall token");

        if matched || optional {
            Ok(())
        } else {
            Err(Error::invalid(SYSCALL, token))
        }
    }

    // Split a trailing `@designator` off `body`, selecting the personalities it names.
    fn split_personality<'t>(
        &self,
        body: &'t str,
        token: &str,
    ) -> Result<(&'t str, Vec<Personality>)> {
        let (body, designator) = match body.rfind('@') {
            Some(at) => (&body[..at], &body[at + 1..]),
            None => {
                let all = (0..self.catalogs.len()).map(Personality::new).collect();
                return Ok((body, all));
            },
        };

        match self.catalogs.iter().position(|c| c.designator() == designator) {
            Some(index) => Ok((body, vec![Personality::new(index)])),
            None => Err(Error::Personality {
                designator: designator.to_owned(),
                token: token.to_owned(),
            }),
        }
    }

    fn number(&self, body: &str, personalities: &[Personality], set: &mut NumberSetArray) -> bool {
        let n = match crate::lookup::uint(body) {
            Some(n) => n,
            None => return false,
        };

        let mut matched = false;

        for &p in personalities {
            let catalog = &self.catalogs[p.index()];

            let n = if catalog.is_valid(n) {
                n
            } else {
                // Some ABIs number a private syscall range differently from their table.
                let unshuffled = catalog.unshuffle(n);

                if !catalog.is_valid(unshuffled) {
                    continue;
                }

                unshuffled
            };

            set.add(n, p);
            matched = true;
        }

        matched
    }

    fn regex(&self, pattern: &str, personalities: &[Personality], set: &mut NumberSetArray) -> Result<bool> {
        let pattern = pattern.strip_suffix('/').unwrap_or(pattern);
        let re = PosixRegex::new(pattern)?;

        let mut matched = false;

        for &p in personalities {
            for (n, entry) in self.catalogs[p.index()].entries() {
                if re.is_match(&entry.name)? {
                    set.add(n, p);
                    matched = true;
                }
            }
        }

        Ok(matched)
    }

    // Returns `None` if `body` is not a class name.
    fn class(&self, body: &str, personalities: &[Personality], set: &mut NumberSetArray) -> Option<bool> {
        let mask = lookup_class(body)?;

        let mut matched = false;

        for &p in personalities {
            for (n, entry) in self.catalogs[p.index()].entries() {
                if entry.flags.contains(mask) {
                    set.add(n, p);
                    matched = true;
                }
            }
        }

        Some(matched)
    }

    fn name(&self, body: &str, personalities: &[Personality], set: &mut NumberSetArray) -> bool {
        let mut matched = false;

        for &p in personalities {
            for n in self.catalogs[p.index()].lookup(body) {
                set.add(n, p);
                matched = true;
            }
        }

        matched
    }
}

/// Compile a single-dimension qualifier (signals, descriptors, ...) into a set.
///
/// Each token is resolved by `lookup`; `kind` names the token type in errors.
pub fn numbers<F>(spec: &str, lookup: F, kind: &'static str) -> Result<NumberSet>
where
    F: Fn(&str) -> Option<u32>,
{
    let mut set = NumberSet::new();

    let rest = strip_negations(spec, || set.invert());

    match rest {
        "none" => return Ok(set),
        "all" => {
            set.invert();
            return Ok(set);
        },
        _ => {},
    }

    let mut done = false;

    for token in rest.split(',').filter(|t| !t.is_empty()) {
        let n = lookup(token).ok_or_else(|| Error::invalid(kind, token))?;
        set.add(n);
        done = true;
    }

    if !done {
        return Err(Error::invalid(kind, spec));
    }

    Ok(set)
}

// Strip leading `!`s, calling `invert` once per `!`.
fn strip_negations(mut spec: &str, mut invert: impl FnMut()) -> &str {
    while let Some(rest) = spec.strip_prefix('!') {
        invert();
        spec = rest;
    }

    spec
}
