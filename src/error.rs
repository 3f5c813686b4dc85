//! Error taxonomy for the pipeline.
//!
//! Fetch and delivery failures are recorded per source / per destination and
//! collected into a [`CycleErrors`] report; only configuration problems are
//! fatal, and only at load time.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Why a single source fetch failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchErrorKind {
    #[error("network error: {0}")]
    Network(String),

    #[error("non-success status {0}")]
    Status(u16),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("fetch task panicked: {0}")]
    Panicked(String),

    #[error("cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error("source {source_name}: {kind}")]
    Fetch {
        source_name: String,
        kind: FetchErrorKind,
    },

    #[error("delivery to {destination} failed: {message}")]
    Delivery {
        destination: String,
        message: String,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("cycle cancelled")]
    Cancelled,

    #[error("a cycle is already in progress")]
    CycleInProgress,

    #[error("unknown source {name}{}", .suggestion.as_ref().map(|s| format!(" (did you mean {s}?)")).unwrap_or_default())]
    UnknownSource {
        name: String,
        suggestion: Option<String>,
    },
}

impl PipelineError {
    pub fn fetch(source_name: impl Into<String>, kind: FetchErrorKind) -> Self {
        Self::Fetch {
            source_name: source_name.into(),
            kind,
        }
    }

    pub fn delivery(destination: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Delivery {
            destination: destination.into(),
            message: message.to_string(),
        }
    }
}

/// All non-fatal failures of one cycle, in the order they were observed.
#[derive(Debug, Clone, Default)]
pub struct CycleErrors {
    errors: Vec<PipelineError>,
}

impl CycleErrors {
    pub fn push(&mut self, err: PipelineError) {
        self.errors.push(err);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PipelineError> {
        self.errors.iter()
    }

    pub fn fetch_failures(&self) -> impl Iterator<Item = (&str, &FetchErrorKind)> {
        self.errors.iter().filter_map(|e| match e {
            PipelineError::Fetch { source_name, kind } => Some((source_name.as_str(), kind)),
            _ => None,
        })
    }

    pub fn delivery_failures(&self) -> impl Iterator<Item = &str> {
        self.errors.iter().filter_map(|e| match e {
            PipelineError::Delivery { destination, .. } => Some(destination.as_str()),
            _ => None,
        })
    }
}

impl fmt::Display for CycleErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.is_empty() {
            return write!(f, "no errors");
        }
        write!(f, "{} error(s): ", self.errors.len())?;
        for (i, e) in self.errors.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{e}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CycleErrors {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_errors_join_members() {
        let mut errs = CycleErrors::default();
        errs.push(PipelineError::fetch("Wire", FetchErrorKind::Status(503)));
        errs.push(PipelineError::delivery("ops", "HTTP 429"));

        let text = errs.to_string();
        assert_eq!(
            text,
            "2 error(s): source Wire: non-success status 503; delivery to ops failed: HTTP 429"
        );
        assert_eq!(errs.fetch_failures().count(), 1);
        assert_eq!(errs.delivery_failures().collect::<Vec<_>>(), vec!["ops"]);
    }

    #[test]
    fn timeout_renders_seconds() {
        let k = FetchErrorKind::Timeout(Duration::from_secs(30));
        assert_eq!(k.to_string(), "timed out after 30s");
    }
}
