use super::{CircuitOpen, ErrorCategory};
use crate::error::{IntegrationError, QueueError, RoutingError};
use std::io::ErrorKind;

/// Map a caught error to its recovery category.
///
/// Explicit categories win (an [`IntegrationError`] anywhere in the chain),
/// then well-known concrete error types, then message heuristics. Anything
/// unrecognised is treated as transient; retries are bounded by the caller.
pub fn classify(err: &anyhow::Error) -> ErrorCategory {
    for cause in err.chain() {
        if let Some(integration) = cause.downcast_ref::<IntegrationError>() {
            return integration.category;
        }
    }

    for cause in err.chain() {
        if let Some(category) = classify_known_type(cause) {
            return category;
        }
    }

    classify_message(&format!("{err:#}"))
}

fn classify_known_type(cause: &(dyn std::error::Error + 'static)) -> Option<ErrorCategory> {
    if cause.downcast_ref::<tokio::time::error::Elapsed>().is_some()
        || cause.downcast_ref::<CircuitOpen>().is_some()
    {
        return Some(ErrorCategory::Transient);
    }
    if let Some(io) = cause.downcast_ref::<std::io::Error>() {
        return Some(classify_io(io.kind()));
    }
    if cause.downcast_ref::<serde_json::Error>().is_some()
        || cause.downcast_ref::<serde_yaml::Error>().is_some()
    {
        return Some(ErrorCategory::Data);
    }
    if let Some(queue) = cause.downcast_ref::<QueueError>() {
        return Some(match queue {
            QueueError::Malformed { .. } => ErrorCategory::Data,
            QueueError::AlreadyMoved { .. } | QueueError::AlreadyExists { .. } => {
                ErrorCategory::Logic
            }
            QueueError::Io { source, .. } => classify_io(source.kind()),
        });
    }
    if cause.downcast_ref::<RoutingError>().is_some() {
        return Some(ErrorCategory::Data);
    }
    None
}

fn classify_io(kind: ErrorKind) -> ErrorCategory {
    match kind {
        ErrorKind::OutOfMemory | ErrorKind::StorageFull | ErrorKind::QuotaExceeded => {
            ErrorCategory::System
        }
        ErrorKind::InvalidData | ErrorKind::UnexpectedEof => ErrorCategory::Data,
        _ => ErrorCategory::Transient,
    }
}

fn classify_message(message: &str) -> ErrorCategory {
    let lower = message.to_ascii_lowercase();

    const SYSTEM_MARKERS: [&str; 4] = [
        "too many open files",
        "no space left",
        "out of memory",
        "cannot allocate",
    ];
    const AUTH_MARKERS: [&str; 9] = [
        "401",
        "403",
        "unauthorized",
        "forbidden",
        "invalid_grant",
        "token expired",
        "token has expired",
        "revoked",
        "authentication failed",
    ];
    const TRANSIENT_MARKERS: [&str; 9] = [
        "429",
        "rate limit",
        "timed out",
        "timeout",
        "503",
        "502",
        "temporarily",
        "connection reset",
        "connection refused",
    ];
    const LOGIC_MARKERS: [&str; 3] = ["contradict", "inconsistent", "ambiguous"];
    const DATA_MARKERS: [&str; 4] = [
        "missing field",
        "missing required",
        "invalid type",
        "malformed",
    ];

    if SYSTEM_MARKERS.iter().any(|marker| lower.contains(marker)) {
        return ErrorCategory::System;
    }
    if AUTH_MARKERS.iter().any(|marker| lower.contains(marker)) {
        return ErrorCategory::Authentication;
    }
    if TRANSIENT_MARKERS.iter().any(|marker| lower.contains(marker)) {
        return ErrorCategory::Transient;
    }
    if LOGIC_MARKERS.iter().any(|marker| lower.contains(marker)) {
        return ErrorCategory::Logic;
    }
    if DATA_MARKERS.iter().any(|marker| lower.contains(marker)) {
        return ErrorCategory::Data;
    }
    ErrorCategory::Transient
}

/// Map a collaborator's machine-readable error code to a category.
pub fn category_for_code(code: &str) -> ErrorCategory {
    match code.to_ascii_lowercase().as_str() {
        "auth_expired" | "auth_revoked" | "unauthorized" | "forbidden" | "invalid_credentials" => {
            ErrorCategory::Authentication
        }
        "invalid_content" | "contradictory" | "policy_violation" => ErrorCategory::Logic,
        "missing_field" | "invalid_parameters" | "bad_request" | "not_found" => {
            ErrorCategory::Data
        }
        "crash" | "resource_exhausted" | "internal" => ErrorCategory::System,
        _ => ErrorCategory::Transient,
    }
}
