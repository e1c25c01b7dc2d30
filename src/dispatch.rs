//! Activation side effects
//!
//! Turns an activation into an [`ActionResult`]. Clicks and action buttons
//! fire at most one side effect, chosen in a fixed order:
//! 1. activate the application given by bundle identifier
//! 2. run the shell command
//! 3. open the URL
//!
//! Replies and close activations never fire side effects. A failing side
//! effect is recorded in the result, never propagated: the user already
//! interacted with the notification successfully.

use std::io;
use std::process::{Command, Stdio};

use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::registry::ActivationKind;
use crate::request::DeliverRequest;

/// Why a side effect did not happen
#[derive(Error, Debug)]
pub enum ActionError {
    #[error("Unable to find an application with the bundle identifier '{0}'")]
    ApplicationNotFound(String),

    #[error("command `{command}` exited with {status}")]
    CommandFailed { command: String, status: String },

    #[error("could not open {url}: {reason}")]
    OpenFailed { url: String, reason: String },

    #[error("could not start {program}: {source}")]
    Spawn {
        program: &'static str,
        #[source]
        source: io::Error,
    },
}

/// The activation type reported to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ActivationType {
    ContentsClicked,
    ActionClicked,
    Replied,
    Closed,
    Timeout,
    Failed,
}

/// A side effect that was attempted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideEffect {
    ActivatedApplication(String),
    RanCommand(String),
    OpenedUrl(Url),
}

/// What the activation meant and what it caused
#[derive(Debug)]
pub struct ActionResult {
    pub activation_type: ActivationType,
    /// Reply text, action label, or close label
    pub value: Option<String>,
    pub side_effect: Option<SideEffect>,
    pub error: Option<ActionError>,
}

/// OS services for activating apps, running commands and opening URLs
pub trait Workspace: Send + Sync {
    fn activate_application(&self, bundle_id: &str) -> Result<(), ActionError>;
    fn run_command(&self, command: &str) -> Result<(), ActionError>;
    fn open_url(&self, url: &Url) -> Result<(), ActionError>;
}

/// [`Workspace`] backed by the platform's launcher commands
pub struct SystemWorkspace;

#[cfg(target_os = "macos")]
const APP_LAUNCHER: &str = "open";
#[cfg(not(target_os = "macos"))]
const APP_LAUNCHER: &str = "gtk-launch";

#[cfg(target_os = "macos")]
const URL_OPENER: &str = "open";
#[cfg(windows)]
const URL_OPENER: &str = "explorer";
#[cfg(not(any(target_os = "macos", windows)))]
const URL_OPENER: &str = "xdg-open";

#[cfg(windows)]
const SHELL: (&str, &str) = ("cmd", "/C");
#[cfg(not(windows))]
const SHELL: (&str, &str) = ("sh", "-c");

impl Workspace for SystemWorkspace {
    fn activate_application(&self, bundle_id: &str) -> Result<(), ActionError> {
        let mut launcher = Command::new(APP_LAUNCHER);
        if cfg!(target_os = "macos") {
            launcher.arg("-b");
        }
        let status = launcher
            .arg(bundle_id)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|source| ActionError::Spawn {
                program: APP_LAUNCHER,
                source,
            })?;

        if !status.success() {
            return Err(ActionError::ApplicationNotFound(bundle_id.to_string()));
        }
        Ok(())
    }

    fn run_command(&self, command: &str) -> Result<(), ActionError> {
        let (shell, flag) = SHELL;
        // stdout carries the activation result, so the command writes to stderr
        let status = Command::new(shell)
            .args([flag, command])
            .stdout(Stdio::from(io::stderr()))
            .status()
            .map_err(|source| ActionError::Spawn {
                program: shell,
                source,
            })?;

        if !status.success() {
            return Err(ActionError::CommandFailed {
                command: command.to_string(),
                status: status.to_string(),
            });
        }
        Ok(())
    }

    fn open_url(&self, url: &Url) -> Result<(), ActionError> {
        let status = Command::new(URL_OPENER)
            .arg(url.as_str())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|source| ActionError::Spawn {
                program: URL_OPENER,
                source,
            })?;

        if !status.success() {
            return Err(ActionError::OpenFailed {
                url: url.to_string(),
                reason: format!("{URL_OPENER} exited with {status}"),
            });
        }
        Ok(())
    }
}

/// Maps activations to results, firing side effects through a [`Workspace`]
pub struct ActionDispatcher<W> {
    workspace: W,
}

impl<W: Workspace> ActionDispatcher<W> {
    pub fn new(workspace: W) -> Self {
        Self { workspace }
    }

    pub fn dispatch(&self, kind: &ActivationKind, request: &DeliverRequest) -> ActionResult {
        let (activation_type, value) = match kind {
            ActivationKind::Clicked => (ActivationType::ContentsClicked, None),
            ActivationKind::ActionButton(index) => (
                ActivationType::ActionClicked,
                Some(
                    request
                        .actions()
                        .get(*index)
                        .cloned()
                        .unwrap_or_else(|| index.to_string()),
                ),
            ),
            ActivationKind::Replied(text) => (ActivationType::Replied, Some(text.clone())),
            ActivationKind::Closed => (ActivationType::Closed, request.close_label.clone()),
        };

        let (side_effect, error) = match kind {
            ActivationKind::Clicked | ActivationKind::ActionButton(_) => self.fire(request),
            ActivationKind::Replied(_) | ActivationKind::Closed => (None, None),
        };

        ActionResult {
            activation_type,
            value,
            side_effect,
            error,
        }
    }

    fn fire(&self, request: &DeliverRequest) -> (Option<SideEffect>, Option<ActionError>) {
        let (effect, result) = if let Some(bundle_id) = &request.activate_bundle_id {
            (
                SideEffect::ActivatedApplication(bundle_id.clone()),
                self.workspace.activate_application(bundle_id),
            )
        } else if let Some(command) = &request.command {
            (
                SideEffect::RanCommand(command.clone()),
                self.workspace.run_command(command),
            )
        } else if let Some(url) = &request.open_url {
            (
                SideEffect::OpenedUrl(url.clone()),
                self.workspace.open_url(url),
            )
        } else {
            return (None, None);
        };

        match result {
            Ok(()) => {
                tracing::info!(effect = ?effect, "Side effect completed");
                (Some(effect), None)
            }
            Err(e) => {
                tracing::warn!(effect = ?effect, error = %e, "Side effect failed");
                (Some(effect), Some(e))
            }
        }
    }
}
