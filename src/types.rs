use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

/// Policy deciding whether one node's failure aborts the whole run.
///
/// - `FailFast`: the first collected node error cancels the rest of the level
///   and is returned from `execute` (default).
/// - `ContinueOnError`: failures are recorded on the node's own result;
///   dependents are skipped but unrelated nodes keep running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorStrategy {
    #[default]
    FailFast,
    ContinueOnError,
}

impl FromStr for ErrorStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "fail_fast" => Ok(ErrorStrategy::FailFast),
            "continue_on_error" | "continue" => Ok(ErrorStrategy::ContinueOnError),
            other => Err(format!(
                "invalid error_strategy: {other} (expected \"fail_fast\" or \"continue_on_error\")"
            )),
        }
    }
}

impl fmt::Display for ErrorStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorStrategy::FailFast => f.write_str("fail_fast"),
            ErrorStrategy::ContinueOnError => f.write_str("continue_on_error"),
        }
    }
}

/// How the command executor interprets a process's stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Trimmed stdout becomes a JSON string value.
    #[default]
    Text,
    /// Stdout must be a JSON document; anything else fails the node.
    Json,
}
