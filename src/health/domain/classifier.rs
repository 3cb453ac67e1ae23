//! Tagged classification of stage log lines.

use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::LazyLock;

/// What kind of failure a log line signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A generator process reported a non-zero exit.
    ProcessExit,
    /// An uncaught exception or traceback.
    Exception,
    /// An explicit failure marker written by a generator.
    MarkedFailure,
    /// A generic `error:` line.
    Error,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ProcessExit => "process_exit",
            Self::Exception => "exception",
            Self::MarkedFailure => "marked_failure",
            Self::Error => "error",
        })
    }
}

/// How serious a classified line is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Recoverable by reopening the task.
    Error,
    /// The generator process itself died.
    Fatal,
}

/// A log line that matched a classification rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogSignal {
    /// Matched kind.
    pub kind: ErrorKind,
    /// Matched severity.
    pub severity: Severity,
    /// The full matching line.
    pub line: String,
}

struct Rule {
    pattern: Regex,
    kind: ErrorKind,
    severity: Severity,
}

/// Classifies log lines: an ignore list is checked first, then ordered
/// rules where the first match wins.
pub struct LogClassifier {
    ignore: Vec<Regex>,
    rules: Vec<Rule>,
}

impl fmt::Debug for LogClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogClassifier")
            .field("ignore", &self.ignore.len())
            .field("rules", &self.rules.len())
            .finish()
    }
}

static STANDARD: LazyLock<LogClassifier> = LazyLock::new(|| {
    LogClassifier::from_patterns(
        &[
            r"(?i)\bretry(ing)?\b",
            r"(?i)\b(no|0) errors? (found|reported)\b",
        ],
        &[
            (
                r"(?i)(python process exited with code [1-9]\d*|프로세스가 코드 [1-9]\d*로 종료)",
                ErrorKind::ProcessExit,
                Severity::Fatal,
            ),
            (
                r"(?i)(traceback \(most recent call last\)|exception:)",
                ErrorKind::Exception,
                Severity::Fatal,
            ),
            (
                r"(❌\s*(오류\s*발생|실패)|✗\s*실패!)",
                ErrorKind::MarkedFailure,
                Severity::Error,
            ),
            (r"(?i)error:", ErrorKind::Error, Severity::Error),
        ],
    )
});

impl LogClassifier {
    /// Returns the classifier used for generator logs.
    #[must_use]
    pub fn standard() -> &'static Self {
        &STANDARD
    }

    /// Builds a classifier from raw patterns. Patterns that fail to compile
    /// are skipped.
    #[must_use]
    pub fn from_patterns(ignore: &[&str], rules: &[(&str, ErrorKind, Severity)]) -> Self {
        Self {
            ignore: ignore
                .iter()
                .filter_map(|pattern| Regex::new(pattern).ok())
                .collect(),
            rules: rules
                .iter()
                .filter_map(|&(pattern, kind, severity)| {
                    Regex::new(pattern).ok().map(|compiled| Rule {
                        pattern: compiled,
                        kind,
                        severity,
                    })
                })
                .collect(),
        }
    }

    /// Classifies one line.
    #[must_use]
    pub fn classify(&self, line: &str) -> Option<LogSignal> {
        if self.ignore.iter().any(|pattern| pattern.is_match(line)) {
            return None;
        }
        self.rules
            .iter()
            .find(|rule| rule.pattern.is_match(line))
            .map(|rule| LogSignal {
                kind: rule.kind,
                severity: rule.severity,
                line: line.to_owned(),
            })
    }

    /// Returns the first classified line of `lines`.
    #[must_use]
    pub fn first_signal<'a>(&self, lines: impl IntoIterator<Item = &'a str>) -> Option<LogSignal> {
        lines.into_iter().find_map(|line| self.classify(line))
    }
}
