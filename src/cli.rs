//! CLI argument parsing
//!
//! Uses clap for argument parsing with derive macros. The parsed arguments
//! are turned into a validated [`crate::request::Request`] before anything
//! touches the notification backend.

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;

const AFTER_HELP: &str = "\
When the user activates a notification, the result is printed to stdout
(plain text, or JSON with --json) and the process exits.

Note that in some circumstances the first character of a message has to be
escaped in order to be recognized. An example of this is when using an open
bracket, which has to be escaped like so: '\\['.";

/// Send desktop notifications from the command line and wait for the user's response
#[derive(Parser, Debug)]
#[command(name = "beckon")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = AFTER_HELP)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "BECKON_LOG", default_value = "info", global = true)]
    pub log_level: String,

    /// Configuration file (default: ~/.config/beckon/config.toml)
    #[arg(long, env = "BECKON_CONFIG", global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Deliver a notification
    ///
    /// The message comes from --message or, when stdin is not a terminal,
    /// from piped input. Old notifications with the same --group are replaced.
    #[command(visible_alias = "send")]
    Deliver(DeliverArgs),

    /// List delivered notifications of a group (or ALL) as tab-separated lines
    List {
        /// Group ID, or ALL
        group: String,

        /// Output a JSON array instead of tab-separated lines
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Remove delivered notifications of a group (or ALL)
    Remove {
        /// Group ID, or ALL
        group: String,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Options for a single delivery
#[derive(Args, Debug, Default, Clone)]
pub struct DeliverArgs {
    /// The notification message
    #[arg(short, long)]
    pub message: Option<String>,

    /// The notification title (default: Terminal)
    #[arg(short, long)]
    pub title: Option<String>,

    /// The notification subtitle
    #[arg(short, long)]
    pub subtitle: Option<String>,

    /// Sound to play; use 'default' for the default notification sound
    #[arg(long, value_name = "NAME")]
    pub sound: Option<String>,

    /// Group the notification belongs to; old notifications with the same ID are removed
    #[arg(short, long, value_name = "ID")]
    pub group: Option<String>,

    /// Bundle identifier of the application to activate on click
    #[arg(short, long, value_name = "ID")]
    pub activate: Option<String>,

    /// Bundle identifier of the application shown as the sender
    #[arg(long, value_name = "ID")]
    pub sender: Option<String>,

    /// URL of an image to display instead of the application icon
    #[arg(long, value_name = "URL")]
    pub app_icon: Option<String>,

    /// URL of an image to attach to the notification
    #[arg(long, value_name = "URL")]
    pub content_image: Option<String>,

    /// Label of the close button
    #[arg(long, value_name = "LABEL")]
    pub close_label: Option<String>,

    /// Comma-separated action buttons; more than one shows a dropdown
    #[arg(long, value_name = "A,B", value_delimiter = ',')]
    pub actions: Vec<String>,

    /// Title of the actions dropdown (only with multiple actions)
    #[arg(long, value_name = "LABEL")]
    pub dropdown_label: Option<String>,

    /// Show a reply field, with an optional placeholder
    #[arg(long, value_name = "PLACEHOLDER", num_args = 0..=1, default_missing_value = "Reply")]
    pub reply: Option<String>,

    /// URL to open when the user clicks the notification
    #[arg(short, long, value_name = "URL")]
    pub open: Option<String>,

    /// Shell command to run when the user clicks the notification
    #[arg(short, long, value_name = "COMMAND")]
    pub execute: Option<String>,

    /// Close the notification after SECONDS
    #[arg(long, value_name = "SECONDS")]
    pub timeout: Option<u64>,

    /// Print the activation result as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

/// Generate shell completions and print to stdout
pub fn print_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "beckon", &mut io::stdout());
}

/// Print the help banner to stdout
pub fn print_help() {
    let mut cmd = Cli::command();
    let _ = cmd.print_help();
}

/// Read the message piped on stdin
///
/// Returns `None` when stdin is a terminal, so an interactive invocation
/// never blocks waiting for input that will not come.
pub fn read_piped_message() -> io::Result<Option<String>> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut input = String::new();
    stdin.lock().read_to_string(&mut input)?;
    Ok(Some(input))
}
