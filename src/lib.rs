pub mod action;
pub mod catalog;
pub mod error;
pub mod inject;
pub mod lookup;
pub mod number_set;
pub mod posix_regex;
pub mod qualify;
pub mod registry;

pub use action::{ActionStore, Delay, Phase, PokePayload};
pub use catalog::{Catalog, Personality, SyscallFlags};
pub use error::{Error, Result};
pub use inject::{Action, ActionFlags, InjectKind, Rule, When};
pub use number_set::{NumberSet, NumberSetArray};
pub use qualify::SpecParser;
pub use registry::{Occurrences, QualFlags, Qualifier, RuleRegistry};
