pub type Result<T> = std::result::Result<T, Error>;

/// Configuration error found while compiling a qualifier expression.
///
/// Every variant is fatal to the configuration: callers are expected to report it and
/// abort before tracing begins.
#[derive(thiserror::Error, Debug, Clone, Eq, PartialEq)]
pub enum Error {
    #[error("invalid {kind} '{token}'")]
    Invalid {
        kind: &'static str,
        token: String,
    },

    #[error("invalid personality designator '{designator}' in qualification '{token}'")]
    Personality {
        designator: String,
        token: String,
    },

    #[error("invalid regular expression '{pattern}': {message}")]
    Regex {
        pattern: String,
        message: String,
    },

    #[error("invalid {kind} argument '{token}'")]
    Directive {
        kind: &'static str,
        token: String,
    },

    #[error("{kind} directive '{directive}' given more than once in '{expr}'")]
    Duplicate {
        kind: &'static str,
        directive: &'static str,
        expr: String,
    },

    #[error("error= and retval= are mutually exclusive in '{expr}'")]
    ErrorAndRetval { expr: String },

    #[error("'{directive}' is not allowed in fault expression '{expr}'")]
    NotFault {
        directive: &'static str,
        expr: String,
    },

    #[error("missing :error=, :retval=, :signal=, :poke_enter=, :poke_exit=, :delay_enter=, or :delay_exit= in '{expr}'")]
    NoAction { expr: String },

    #[error("syscall= target '{name}' is not a side-effect-free system call")]
    Impure { name: String },
}

impl Error {
    pub(crate) fn invalid(kind: &'static str, token: impl Into<String>) -> Self {
        let token = token.into();
        Error::Invalid { kind, token }
    }

    pub(crate) fn directive(kind: &'static str, token: impl Into<String>) -> Self {
        let token = token.into();
        Error::Directive { kind, token }
    }
}

/// Abort on a violated internal invariant.
///
/// These indicate a bug in the caller (or pathological input volume), never a malformed
/// configuration, and so are not reported as [`Error`] values.
macro_rules! internal_error {
    ($($arg:tt)+) => {{
        tracing::error!($($arg)+);
        panic!("internal error: {}", format_args!($($arg)+))
    }};
}

pub(crate) use internal_error;
