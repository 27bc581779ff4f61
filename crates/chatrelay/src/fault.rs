//! Detection of upstream faults the gateway knows how to recover from.
//!
//! Once the upstream issues a function call it refuses every later turn in that
//! conversation until it sees a matching `function_call_output`. The only way
//! out is to drop the continuation token and start over, so the gateway needs
//! to recognise that failure. The upstream reports it only through the error
//! message wording, which is matched here and nowhere else.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::RelayError;

static MISSING_TOOL_OUTPUT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(no tool output found for function call|missing[^.]*(tool|function)[ _]call[ _]output)",
    )
    .expect("missing tool output pattern is valid")
});

/// Decides whether an upstream failure warrants the one recovery retry.
pub trait FaultClassifier: Send + Sync + std::fmt::Debug {
    fn is_recoverable(&self, err: &RelayError) -> bool;
}

/// Matches the upstream complaint about an unanswered function call.
#[derive(Debug, Clone, Copy, Default)]
pub struct MissingToolOutput;

impl MissingToolOutput {
    pub fn matches(message: &str) -> bool {
        MISSING_TOOL_OUTPUT.is_match(message)
    }
}

impl FaultClassifier for MissingToolOutput {
    fn is_recoverable(&self, err: &RelayError) -> bool {
        match err {
            RelayError::Upstream(message) => Self::matches(message),
            _ => false,
        }
    }
}
