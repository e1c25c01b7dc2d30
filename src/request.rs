//! Validated, immutable model of one invocation's intent
//!
//! A [`Request`] is built once from parsed arguments, the configuration
//! defaults, and (for deliveries) any piped message. Every rule that can be
//! checked without talking to the notification backend is checked here, so
//! an invalid combination never reaches the session coordinator.

use std::fmt;
use std::time::Duration;

use url::Url;

use crate::cli::{Commands, DeliverArgs};
use crate::config::DeliveryDefaults;
use crate::errors::{BeckonError, Result};

/// Reserved group selector meaning "every notification this tool can see"
pub const ALL_GROUPS: &str = "ALL";

/// Longest accepted `--timeout` (one year)
pub const MAX_TIMEOUT_SECS: u64 = 365 * 24 * 60 * 60;

/// The single intent selected for this run
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Deliver(Box<DeliverRequest>),
    List { selector: GroupSelector, json: bool },
    Remove(GroupSelector),
}

/// Which delivered notifications a list/remove applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupSelector {
    All,
    Group(String),
}

impl GroupSelector {
    /// Parse a command-line group argument (`ALL` selects everything)
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(BeckonError::usage("a group ID (or ALL) is required"));
        }
        if raw == ALL_GROUPS {
            Ok(Self::All)
        } else {
            Ok(Self::Group(raw.to_string()))
        }
    }

    /// Whether a record with this group ID is selected
    pub fn matches(&self, group_id: Option<&str>) -> bool {
        match self {
            Self::All => true,
            Self::Group(wanted) => group_id == Some(wanted.as_str()),
        }
    }
}

impl fmt::Display for GroupSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str(ALL_GROUPS),
            Self::Group(group) => f.write_str(group),
        }
    }
}

/// Notification sound
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sound {
    /// The platform's default notification sound
    Default,
    /// A named system sound
    Named(String),
}

impl Sound {
    fn parse(name: &str) -> Self {
        if name == "default" {
            Self::Default
        } else {
            Self::Named(name.to_string())
        }
    }
}

/// The application a notification claims to come from
///
/// Handed to the registry adapter explicitly instead of patching the
/// process-wide bundle identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SenderIdentity {
    pub bundle_id: Option<String>,
}

/// Interactive controls shown on the notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interaction {
    /// Plain notification (click or close only)
    None,
    /// Action buttons, with a dropdown title when there are several
    Actions {
        labels: Vec<String>,
        dropdown_label: Option<String>,
    },
    /// Inline reply field with placeholder text
    Reply { placeholder: String },
}

/// Everything needed to deliver one notification
#[derive(Debug, Clone, PartialEq)]
pub struct DeliverRequest {
    pub title: String,
    pub subtitle: Option<String>,
    pub message: String,
    pub group_id: Option<String>,
    pub sound: Option<Sound>,
    pub timeout: Option<Duration>,
    pub activate_bundle_id: Option<String>,
    pub command: Option<String>,
    pub open_url: Option<Url>,
    pub app_icon: Option<String>,
    pub content_image: Option<String>,
    pub close_label: Option<String>,
    pub interaction: Interaction,
    pub sender: SenderIdentity,
    pub json_output: bool,
}

impl DeliverRequest {
    /// Build and validate a delivery from command-line options
    ///
    /// `piped` is consulted only when `--message` is absent.
    pub fn from_args(
        args: DeliverArgs,
        defaults: &DeliveryDefaults,
        piped: impl FnOnce() -> std::io::Result<Option<String>>,
    ) -> Result<Self> {
        let message = match args.message {
            Some(message) => message,
            None => piped()?.map(strip_trailing_newline).unwrap_or_default(),
        };
        if message.is_empty() {
            return Err(BeckonError::usage(
                "a message is required (use --message or pipe it on stdin)",
            ));
        }

        let group_id = args.group.filter(|g| !g.is_empty());
        if group_id.as_deref() == Some(ALL_GROUPS) {
            return Err(BeckonError::usage(
                "'ALL' is reserved for list/remove and cannot be used as a group ID",
            ));
        }

        let open_url = args.open.as_deref().map(parse_open_url).transpose()?;

        let timeout = match args.timeout {
            Some(0) => return Err(BeckonError::usage("--timeout must be at least 1 second")),
            Some(secs) if secs > MAX_TIMEOUT_SECS => {
                return Err(BeckonError::usage(format!(
                    "--timeout must be at most {MAX_TIMEOUT_SECS} seconds"
                )))
            }
            Some(secs) => Some(Duration::from_secs(secs)),
            None => None,
        };

        let interaction = interaction(args.actions, args.dropdown_label, args.reply)?;

        Ok(Self {
            title: unescape(args.title.unwrap_or_else(|| defaults.title.clone())),
            subtitle: args.subtitle.map(unescape),
            message: unescape(message),
            group_id,
            sound: args
                .sound
                .or_else(|| defaults.sound.clone())
                .map(|name| Sound::parse(&name)),
            timeout,
            activate_bundle_id: args.activate,
            command: args.execute,
            open_url,
            app_icon: args.app_icon,
            content_image: args.content_image,
            close_label: args.close_label,
            interaction,
            sender: SenderIdentity {
                bundle_id: args.sender.or_else(|| defaults.sender.clone()),
            },
            json_output: args.json || defaults.json,
        })
    }

    /// Whether the session must block until the user responds
    ///
    /// Derived from the options: anything that needs the user's reaction
    /// (reply, actions, click side effects) or an explicit timeout.
    pub fn wait_for_response(&self) -> bool {
        !matches!(self.interaction, Interaction::None)
            || self.timeout.is_some()
            || self.command.is_some()
            || self.open_url.is_some()
            || self.activate_bundle_id.is_some()
    }

    /// Action button labels, empty when the notification has none
    pub fn actions(&self) -> &[String] {
        match &self.interaction {
            Interaction::Actions { labels, .. } => labels,
            _ => &[],
        }
    }
}

impl Request {
    /// Build the request for a parsed subcommand
    ///
    /// `None` means no subcommand was given: the message must then be piped.
    pub fn from_command(
        command: Option<Commands>,
        defaults: &DeliveryDefaults,
        piped: impl FnOnce() -> std::io::Result<Option<String>>,
    ) -> Result<Self> {
        match command {
            Some(Commands::Deliver(args)) => Ok(Self::Deliver(Box::new(
                DeliverRequest::from_args(args, defaults, piped)?,
            ))),
            Some(Commands::List { group, json }) => Ok(Self::List {
                selector: GroupSelector::parse(&group)?,
                json,
            }),
            Some(Commands::Remove { group }) => Ok(Self::Remove(GroupSelector::parse(&group)?)),
            Some(Commands::Completions { .. }) => Err(BeckonError::usage(
                "completions are generated before a request is built",
            )),
            None => {
                let Some(message) = piped()?
                    .map(strip_trailing_newline)
                    .filter(|message| !message.is_empty())
                else {
                    return Err(BeckonError::usage(
                        "one of deliver, list or remove is required (unless a message is piped)",
                    ));
                };
                let args = DeliverArgs {
                    message: Some(message),
                    ..DeliverArgs::default()
                };
                Ok(Self::Deliver(Box::new(DeliverRequest::from_args(
                    args,
                    defaults,
                    || Ok(None),
                )?)))
            }
        }
    }

    /// Sender identity the registry adapter should deliver as
    pub fn sender(&self) -> SenderIdentity {
        match self {
            Self::Deliver(deliver) => deliver.sender.clone(),
            Self::List { .. } | Self::Remove(_) => SenderIdentity::default(),
        }
    }
}

fn interaction(
    actions: Vec<String>,
    dropdown_label: Option<String>,
    reply: Option<String>,
) -> Result<Interaction> {
    let requested_actions = !actions.is_empty();
    let labels: Vec<String> = actions
        .into_iter()
        .map(|label| label.trim().to_string())
        .filter(|label| !label.is_empty())
        .collect();

    if requested_actions && labels.is_empty() {
        return Err(BeckonError::usage("--actions needs at least one non-empty label"));
    }

    match (labels.is_empty(), reply) {
        (false, Some(_)) => Err(BeckonError::usage(
            "--actions and --reply cannot be combined",
        )),
        (false, None) => {
            let dropdown_label = if labels.len() > 1 {
                dropdown_label
            } else {
                if dropdown_label.is_some() {
                    tracing::debug!("Ignoring --dropdown-label: needs more than one action");
                }
                None
            };
            Ok(Interaction::Actions {
                labels,
                dropdown_label,
            })
        }
        (true, Some(placeholder)) => Ok(Interaction::Reply { placeholder }),
        (true, None) => Ok(Interaction::None),
    }
}

/// Validate `--open`: it must carry both a scheme and a host
fn parse_open_url(raw: &str) -> Result<Url> {
    match Url::parse(raw) {
        Ok(url) if url.host_str().is_some_and(|host| !host.is_empty()) => Ok(url),
        _ => Err(BeckonError::InvalidUrl(raw.to_string())),
    }
}

/// Drop one leading backslash used to escape the first character
fn unescape(text: String) -> String {
    match text.strip_prefix('\\') {
        Some(rest) => rest.to_string(),
        None => text,
    }
}

fn strip_trailing_newline(mut text: String) -> String {
    if text.ends_with('\n') {
        text.pop();
        if text.ends_with('\r') {
            text.pop();
        }
    }
    text
}
