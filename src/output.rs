//! Rendering of session outcomes and listings
//!
//! Rendering is pure: it produces the lines to print and the exit code, and
//! `main` does the writing. stdout only ever carries machine-parseable
//! results; diagnostics go to stderr.

use serde::Serialize;

use crate::dispatch::{ActionResult, ActivationType};
use crate::errors::{Result, EXIT_FAILURE, EXIT_INTERRUPTED, EXIT_SUCCESS};
use crate::registry::NotificationRecord;
use crate::session::{Outcome, SessionFailure};

/// Header line of the tab-separated listing
pub const LIST_HEADER: &str = "GroupID\tTitle\tSubtitle\tMessage\tDelivered At";

const DELIVERED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S %z";

/// What to print for one run, and how to exit
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Rendered {
    pub stdout: Option<String>,
    pub stderr: Vec<String>,
    pub exit_code: u8,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ActivationJson<'a> {
    activation_type: ActivationType,
    #[serde(skip_serializing_if = "Option::is_none")]
    activation_value: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    action_error: Option<String>,
}

/// Render a finished session
///
/// `action` is the dispatcher's result for `Outcome::Activated`, and is
/// ignored for every other outcome.
pub fn render_outcome(
    outcome: &Outcome,
    action: Option<&ActionResult>,
    json: bool,
) -> Result<Rendered> {
    let (activation_type, value, action_error) = match (outcome, action) {
        (Outcome::Dismissed, _) => return Ok(Rendered::default()),
        (Outcome::Activated(_), Some(result)) => (
            result.activation_type,
            result.value.clone(),
            result.error.as_ref().map(ToString::to_string),
        ),
        // every activation goes through the dispatcher; treat a missing
        // result as a bare click
        (Outcome::Activated(_), None) => (ActivationType::ContentsClicked, None, None),
        (Outcome::TimedOut, _) => (ActivationType::Timeout, None, None),
        (Outcome::Failed(failure), _) => (ActivationType::Failed, Some(failure.to_string()), None),
    };

    let mut rendered = Rendered {
        exit_code: exit_code(outcome),
        ..Rendered::default()
    };

    if json {
        rendered.stdout = Some(serde_json::to_string(&ActivationJson {
            activation_type,
            activation_value: value.as_deref(),
            action_error,
        })?);
        return Ok(rendered);
    }

    if let Some(error) = action_error {
        rendered.stderr.push(error);
    }
    match activation_type {
        ActivationType::Failed => rendered.stderr.extend(value),
        _ => rendered.stdout = Some(plain_line(activation_type, value.as_deref())),
    }
    Ok(rendered)
}

fn plain_line(activation_type: ActivationType, value: Option<&str>) -> String {
    let tag = match activation_type {
        ActivationType::ContentsClicked => "@CONTENTCLICKED",
        ActivationType::ActionClicked => "@ACTIONCLICKED",
        ActivationType::Replied => "@REPLIED",
        ActivationType::Closed => "@CLOSED",
        ActivationType::Timeout => "@TIMEOUT",
        ActivationType::Failed => "@FAILED",
    };
    match (activation_type, value) {
        (
            ActivationType::ActionClicked | ActivationType::Replied | ActivationType::Closed,
            Some(value),
        ) => {
            format!("{tag} {value}")
        }
        _ => tag.to_string(),
    }
}

/// Process exit code for a session outcome
pub fn exit_code(outcome: &Outcome) -> u8 {
    match outcome {
        Outcome::Activated(crate::registry::ActivationKind::Closed) => EXIT_FAILURE,
        Outcome::Activated(_) | Outcome::TimedOut | Outcome::Dismissed => EXIT_SUCCESS,
        Outcome::Failed(SessionFailure::Interrupted) => EXIT_INTERRUPTED,
        Outcome::Failed(SessionFailure::Rejected(_)) => EXIT_FAILURE,
    }
}

/// Render delivered notifications as a JSON array or tab-separated lines
pub fn render_list(records: &[NotificationRecord], json: bool) -> Result<String> {
    if json {
        return Ok(serde_json::to_string_pretty(records)?);
    }
    if records.is_empty() {
        return Ok(String::new());
    }

    let mut lines = vec![LIST_HEADER.to_string()];
    lines.extend(records.iter().map(|record| {
        [
            record.group_id.as_deref().map(sanitize).unwrap_or_default(),
            sanitize(&record.title),
            record.subtitle.as_deref().map(sanitize).unwrap_or_default(),
            sanitize(&record.message),
            record.delivered_at.format(DELIVERED_AT_FORMAT).to_string(),
        ]
        .join("\t")
    }));
    Ok(lines.join("\n"))
}

/// Keep one record per line and one field per column
fn sanitize(field: &str) -> String {
    field
        .chars()
        .map(|c| if matches!(c, '\t' | '\n' | '\r') { ' ' } else { c })
        .collect()
}
