//! Classification of the diagnostics written by the dump tool.

use derive_more::Display;
use regex::Regex;

/// Failure categories reported by the dump tool.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The dump succeeded.
    #[display("no error")]
    NoError,
    /// The database doesn't exist on the server.
    #[display("unknown database")]
    UnknownDatabase,
    /// The host of the database can't be resolved.
    #[display("host unreachable")]
    HostUnreachable,
    /// User or password were rejected.
    #[display("authentication failed")]
    AuthenticationFailed,
    /// No connection to the server could be established at all.
    #[display("server unreachable")]
    ServerUnreachable,
    /// Diagnostics present but not recognized.
    #[display("unclassified error")]
    Unclassified,
}

impl ErrorKind {
    /// Returns if the failure concerns every database and no further dumps should be attempted.
    pub fn is_server_wide(self) -> bool {
        matches!(self, Self::ServerUnreachable)
    }
}

/// Classified diagnostics of a single dump.
#[derive(Clone, Debug, Display, PartialEq, Eq, serde::Serialize)]
#[display("{kind}: {diagnostic}")]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    /// The part of the diagnostics relevant to [`kind`](Self::kind).
    pub diagnostic: String,
}

impl ClassifiedError {
    pub fn no_error() -> Self {
        Self {
            kind: ErrorKind::NoError,
            diagnostic: String::new(),
        }
    }

    pub fn unclassified(diagnostic: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Unclassified,
            diagnostic: diagnostic.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.kind != ErrorKind::NoError
    }
}

struct Rule {
    pattern: &'static str,
    kind: ErrorKind,
    trim_line_end: bool,
}

/// Known server error codes in the order they are checked.
const RULES: &[Rule] = &[
    // ER_BAD_DB_ERROR
    Rule {
        pattern: "Got error: 1049",
        kind: ErrorKind::UnknownDatabase,
        trim_line_end: false,
    },
    // CR_UNKNOWN_HOST
    Rule {
        pattern: "Got error: 2005",
        kind: ErrorKind::HostUnreachable,
        trim_line_end: false,
    },
    // ER_ACCESS_DENIED_ERROR
    Rule {
        pattern: "Got error: 1045",
        kind: ErrorKind::AuthenticationFailed,
        trim_line_end: false,
    },
    // CR_CONN_HOST_ERROR
    Rule {
        pattern: "Got error: 2003",
        kind: ErrorKind::ServerUnreachable,
        trim_line_end: true,
    },
];

/// Classifies the diagnostics (stderr) of the dump tool.
///
/// The first rule whose pattern occurs in `diagnostics` wins. The reported diagnostic
/// starts at the match and spans the rest of the text.
pub fn classify(diagnostics: &str) -> ClassifiedError {
    if diagnostics.is_empty() {
        return ClassifiedError::no_error();
    }

    RULES
        .iter()
        .find_map(|rule| {
            let start = diagnostics.find(rule.pattern)?;
            let mut diagnostic = &diagnostics[start..];
            if rule.trim_line_end {
                diagnostic = diagnostic.trim_end_matches(['\r', '\n']);
            }

            Some(ClassifiedError {
                kind: rule.kind,
                diagnostic: diagnostic.to_string(),
            })
        })
        .unwrap_or_else(|| ClassifiedError::unclassified(diagnostics))
}

/// Removes harmless warnings of the dump tool before classification.
#[derive(Debug, Clone, Default)]
pub struct WarningFilter {
    ignored: Vec<Regex>,
}

impl WarningFilter {
    /// Creates a filter dropping every line matching one of `patterns`.
    pub fn new<I>(patterns: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let ignored = patterns
            .into_iter()
            .map(|pattern| Regex::new(pattern.as_ref()))
            .collect::<Result<_, _>>()?;

        Ok(Self { ignored })
    }

    /// Returns `diagnostics` without the ignored lines.
    pub fn strip(&self, diagnostics: &str) -> String {
        if self.ignored.is_empty() {
            return diagnostics.to_string();
        }

        diagnostics
            .split_inclusive('\n')
            .filter(|line| {
                let ignore = self.ignored.iter().any(|re| re.is_match(line));
                if ignore {
                    log::trace!(target: "engine::classify", "Ignoring warning: {}", line.trim_end());
                }
                !ignore
            })
            .collect()
    }
}
