//! Error classification and recovery escalation
//!
//! Every preprocessing failure is mapped to a closed `ErrorCategory` and a
//! `RecoveryAction`:
//!
//! - **Retry**: network, timeout, rate-limit and unknown service errors
//! - **Manual**: authentication, validation and unsupported-type errors
//! - **Fallback**: the node already failed with the same message at least
//!   twice in a row; escalated regardless of category so the raw input is
//!   used instead of retrying forever
//!
//! Typed errors map to categories exactly. Only free text coming back from
//! the remote service goes through the keyword heuristic in
//! [`ErrorCategory::from_message`].

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use serde::Serialize;

use crate::error::PreprocessingError;

/// Closed taxonomy of preprocessing failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    Timeout,
    RateLimit,
    Authentication,
    Validation,
    UnsupportedType,
    Unknown,
}

impl ErrorCategory {
    /// Heuristic classification of raw service text
    pub fn from_message(message: &str) -> Self {
        let text = message.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| text.contains(n));

        if has(&["rate limit", "too many requests", "429", "quota"]) {
            ErrorCategory::RateLimit
        } else if has(&["timeout", "timed out", "deadline"]) {
            ErrorCategory::Timeout
        } else if has(&["unauthorized", "forbidden", "authentication", "api key", "401", "403"]) {
            ErrorCategory::Authentication
        } else if has(&["unsupported", "format not", "415"]) {
            ErrorCategory::UnsupportedType
        } else if has(&["invalid", "validation", "bad request", "400", "422"]) {
            ErrorCategory::Validation
        } else if has(&["network", "connection", "fetch", "dns", "unreachable", "econn"]) {
            ErrorCategory::Network
        } else {
            ErrorCategory::Unknown
        }
    }

    /// Category of a typed error
    pub fn of(error: &PreprocessingError) -> Self {
        match error {
            PreprocessingError::Network(_) => ErrorCategory::Network,
            PreprocessingError::Timeout(_) => ErrorCategory::Timeout,
            PreprocessingError::RateLimit(_) => ErrorCategory::RateLimit,
            PreprocessingError::Authentication(_) => ErrorCategory::Authentication,
            PreprocessingError::Validation(_) => ErrorCategory::Validation,
            PreprocessingError::UnsupportedType(_) => ErrorCategory::UnsupportedType,
            PreprocessingError::ConcurrencyLimit { .. } => ErrorCategory::RateLimit,
            PreprocessingError::Service(message)
            | PreprocessingError::Manual(message)
            | PreprocessingError::Engine(message) => ErrorCategory::from_message(message),
            PreprocessingError::AlreadyProcessing(_) | PreprocessingError::Superseded(_) => {
                ErrorCategory::Unknown
            }
        }
    }

    /// Action for this category when no escalation applies
    pub fn default_action(&self) -> RecoveryAction {
        match self {
            ErrorCategory::Network
            | ErrorCategory::Timeout
            | ErrorCategory::RateLimit
            | ErrorCategory::Unknown => RecoveryAction::Retry,
            ErrorCategory::Authentication
            | ErrorCategory::Validation
            | ErrorCategory::UnsupportedType => RecoveryAction::Manual,
        }
    }

    fn user_message(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "Could not reach the preprocessing service",
            ErrorCategory::Timeout => "The preprocessing service took too long to answer",
            ErrorCategory::RateLimit => "The preprocessing service is rate limiting requests",
            ErrorCategory::Authentication => "Check your API credentials and try again",
            ErrorCategory::Validation => "The source image was rejected; pick a different image",
            ErrorCategory::UnsupportedType => "This image format is not supported; convert it and try again",
            ErrorCategory::Unknown => "Preprocessing failed",
        }
    }
}

/// What the caller should do about a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    /// Try again automatically
    Retry,
    /// Stop and ask the user to act
    Manual,
    /// Give up on preprocessing and use the unprocessed input
    Fallback,
}

/// Result of classifying one failure
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryDecision {
    pub action: RecoveryAction,
    pub category: ErrorCategory,
    /// Single human-readable message for the user
    pub message: String,
    /// Consecutive identical failures of this node, this one included
    pub consecutive: u32,
    /// Whether repetition overrode the category's own action
    pub escalated: bool,
}

/// Aggregate view across all tracked nodes
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorSummary {
    pub total_errors: usize,
    pub affected_nodes: usize,
    pub by_category: BTreeMap<ErrorCategory, usize>,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Default)]
struct NodeErrorRecord {
    last_message: Option<String>,
    consecutive: u32,
    retry_count: u32,
    /// Failures per category since the last reset
    failures: BTreeMap<ErrorCategory, usize>,
}

/// Per-node failure history and classification
#[derive(Default)]
pub struct ErrorRecoveryService {
    records: Mutex<HashMap<String, NodeErrorRecord>>,
}

impl ErrorRecoveryService {
    /// Repeats of the same failure, before the current one, that force a fallback
    pub const ESCALATION_THRESHOLD: u32 = 2;

    pub fn new() -> Self {
        Self::default()
    }

    /// Classify a typed failure of `node_id`
    pub fn classify(&self, node_id: &str, error: &PreprocessingError) -> RecoveryDecision {
        self.record(node_id, &error.to_string(), ErrorCategory::of(error))
    }

    /// Classify a raw failure message of `node_id`
    pub fn classify_message(&self, node_id: &str, message: &str) -> RecoveryDecision {
        self.record(node_id, message, ErrorCategory::from_message(message))
    }

    fn record(&self, node_id: &str, message: &str, category: ErrorCategory) -> RecoveryDecision {
        let mut records = self.records.lock();
        let record = records.entry(node_id.to_string()).or_default();

        let previous = if record.last_message.as_deref() == Some(message) {
            record.consecutive
        } else {
            0
        };
        record.last_message = Some(message.to_string());
        record.consecutive = previous + 1;
        *record.failures.entry(category).or_default() += 1;

        let escalated = previous >= Self::ESCALATION_THRESHOLD;
        let action = if escalated {
            RecoveryAction::Fallback
        } else {
            category.default_action()
        };

        let user_message = match action {
            RecoveryAction::Fallback => format!(
                "{} after {} attempts; using the original image instead",
                category.user_message(),
                record.consecutive
            ),
            _ => format!("{}: {}", category.user_message(), message),
        };

        if escalated {
            log::warn!(
                "Node '{}' failed {} times with the same error, escalating to fallback",
                node_id,
                record.consecutive
            );
        }

        RecoveryDecision {
            action,
            category,
            message: user_message,
            consecutive: record.consecutive,
            escalated,
        }
    }

    /// Count one automatic retry of `node_id`, returning the new total
    pub fn record_retry(&self, node_id: &str) -> u32 {
        let mut records = self.records.lock();
        let record = records.entry(node_id.to_string()).or_default();
        record.retry_count += 1;
        record.retry_count
    }

    pub fn retry_count(&self, node_id: &str) -> u32 {
        self.records
            .lock()
            .get(node_id)
            .map_or(0, |r| r.retry_count)
    }

    /// Forget the history of one node, e.g. after it succeeded
    pub fn reset(&self, node_id: &str) {
        self.records.lock().remove(node_id);
    }

    pub fn reset_all(&self) {
        self.records.lock().clear();
    }

    /// Aggregate categories across nodes and suggest coarse remedies
    pub fn system_summary(&self) -> ErrorSummary {
        let records = self.records.lock();
        let mut by_category: BTreeMap<ErrorCategory, usize> = BTreeMap::new();
        let mut total_errors = 0;
        for record in records.values() {
            for (category, count) in &record.failures {
                *by_category.entry(*category).or_default() += count;
                total_errors += count;
            }
        }
        let affected_nodes = records.values().filter(|r| !r.failures.is_empty()).count();

        let count = |c: ErrorCategory| by_category.get(&c).copied().unwrap_or(0);
        let mut suggestions = Vec::new();
        if count(ErrorCategory::Network) > 2 {
            suggestions.push("Multiple network errors; check your internet connection".to_string());
        }
        if count(ErrorCategory::Timeout) > 2 {
            suggestions.push("Requests keep timing out; the service may be overloaded".to_string());
        }
        if count(ErrorCategory::RateLimit) > 1 {
            suggestions.push("Rate limited repeatedly; wait a moment before reconnecting nodes".to_string());
        }
        if count(ErrorCategory::Authentication) > 0 {
            suggestions.push("Authentication failed; verify the configured API key".to_string());
        }
        if count(ErrorCategory::Validation) > 1 {
            suggestions.push("Several images were rejected; check the source images".to_string());
        }
        if count(ErrorCategory::UnsupportedType) > 0 {
            suggestions.push("Some images use unsupported formats; convert them to PNG or JPEG".to_string());
        }

        ErrorSummary {
            total_errors,
            affected_nodes,
            by_category,
            suggestions,
        }
    }
}
