use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

use crate::RiskPolicy;

#[derive(Parser)]
#[command(name = "scriptpilot")]
#[command(about = "Natural-language front end for a directory of script plugins", long_about = None)]
#[command(version)]
pub(crate) struct Cli {
    /// Config file (overrides $SCRIPTPILOT_CONFIG and the default search)
    #[arg(long, global = true)]
    pub(crate) config: Option<PathBuf>,
    /// Plugin root directory
    #[arg(long, global = true)]
    pub(crate) plugins_dir: Option<PathBuf>,
    /// Raise log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub(crate) verbose: u8,
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Plan and run plugins or tools until the request is answered.
    /// Without a request, reads one request per line from stdin.
    Ask {
        request: Vec<String>,
        #[arg(long)]
        max_steps: Option<usize>,
        #[arg(long, value_enum)]
        risk_policy: Option<RiskPolicy>,
        /// Always confirm built-in tool runs
        #[arg(long)]
        confirm_tools: bool,
        /// Always confirm plugin runs
        #[arg(long)]
        confirm_plugins: bool,
        /// Approve every confirmation without asking
        #[arg(short, long)]
        yes: bool,
        /// Print the session report as JSON
        #[arg(long)]
        json: bool,
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        base_url: Option<String>,
        /// Leave OS/cwd/date out of the prompt
        #[arg(long)]
        no_env: bool,
    },

    /// Inspect installed plugins.
    Plugins {
        #[command(subcommand)]
        command: PluginsCommand,
    },

    /// Run one plugin directly.
    Run {
        name: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Run one built-in tool directly.
    Tool {
        name: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Show the resolved configuration.
    Config,
}

#[derive(Subcommand)]
pub(crate) enum PluginsCommand {
    /// List scripts (and functions with --functions).
    List {
        #[arg(long)]
        functions: bool,
        #[arg(long)]
        json: bool,
    },
    /// Metadata for one plugin.
    Info {
        name: String,
        #[arg(long)]
        json: bool,
    },
    /// Function source files and what they declare.
    Files {
        #[arg(long)]
        json: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ask_collects_words_and_flags() {
        let cli = Cli::try_parse_from([
            "scriptpilot",
            "-vv",
            "ask",
            "--risk-policy",
            "strict",
            "--yes",
            "ping",
            "the",
            "router",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Ask {
                request,
                risk_policy,
                yes,
                ..
            } => {
                assert_eq!(request.join(" "), "ping the router");
                assert_eq!(risk_policy, Some(RiskPolicy::Strict));
                assert!(yes);
            }
            _ => panic!("expected ask"),
        }
    }

    #[test]
    fn ask_without_words_reads_stdin() {
        let cli = Cli::try_parse_from(["scriptpilot", "ask", "--json"]).unwrap();
        assert!(matches!(cli.command, Command::Ask { ref request, json: true, .. } if request.is_empty()));
    }

    #[test]
    fn run_passes_hyphenated_args_through() {
        let cli = Cli::try_parse_from(["scriptpilot", "run", "net_ping", "-Target", "h", "-Quiet"]).unwrap();
        match cli.command {
            Command::Run { name, args } => {
                assert_eq!(name, "net_ping");
                assert_eq!(args, vec!["-Target", "h", "-Quiet"]);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["scriptpilot", "plugins", "list", "--plugins-dir", "/p"]).unwrap();
        assert_eq!(cli.plugins_dir, Some(PathBuf::from("/p")));
        assert!(matches!(
            cli.command,
            Command::Plugins {
                command: PluginsCommand::List { functions: false, json: false }
            }
        ));
    }
}
