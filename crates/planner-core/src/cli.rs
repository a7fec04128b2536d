use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "planner",
    version,
    about = "Personal task planner: today, this week and everything else",
    disable_help_subcommand = true,
    arg_required_else_help = false
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "plannerrc")]
    pub plannerrc: Option<PathBuf>,

    #[arg(long = "data")]
    pub data: Option<PathBuf>,

    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub rest: Vec<OsString>,
}

/// Editable task fields shared by `add` and `edit`. For `edit`, passing an
/// empty string or `none` clears a nullable field.
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldArgs {
    #[arg(long)]
    pub note: Option<String>,

    #[arg(long)]
    pub project: Option<String>,

    #[arg(long = "type")]
    pub kind: Option<String>,

    #[arg(long)]
    pub status: Option<String>,

    #[arg(long)]
    pub priority: Option<String>,

    #[arg(long, allow_hyphen_values = true)]
    pub estimate: Option<i64>,

    #[arg(long, allow_hyphen_values = true)]
    pub progress: Option<i64>,

    /// Calendar date the task should be finished by.
    #[arg(long, allow_hyphen_values = true)]
    pub target: Option<String>,

    /// Day the task is planned for.
    #[arg(long, allow_hyphen_values = true)]
    pub scheduled: Option<String>,

    /// Deadline instant.
    #[arg(long, allow_hyphen_values = true)]
    pub due: Option<String>,
}

#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterArgs {
    #[arg(long, default_value = "")]
    pub search: String,

    #[arg(long, default_value = "all")]
    pub status: String,

    #[arg(long, default_value = "all")]
    pub project: String,

    #[arg(long, default_value = "all")]
    pub priority: String,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start a session for a user.
    Login {
        user: String,
        #[arg(long)]
        email: Option<String>,
    },
    /// Register a user and start a session.
    Signup {
        user: String,
        #[arg(long)]
        email: Option<String>,
    },
    Logout,
    Whoami,
    /// Tasks scheduled for today plus unscheduled quick tasks.
    Today,
    /// Monday-first week board with the unscheduled bucket.
    Week,
    /// Every task, filtered.
    All(FilterArgs),
    Add {
        #[arg(required = true, num_args = 1..)]
        title: Vec<String>,
        #[command(flatten)]
        fields: FieldArgs,
    },
    Edit {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[command(flatten)]
        fields: FieldArgs,
    },
    Done {
        id: String,
    },
    /// Advance the status along the configured cycle.
    Cycle {
        id: String,
    },
    /// Reschedule to a day, or `none` for the unscheduled bucket.
    Move {
        id: String,
        #[arg(allow_hyphen_values = true)]
        target: String,
        #[arg(short = 'y', long)]
        yes: bool,
    },
    Delete {
        id: String,
        #[arg(short = 'y', long)]
        yes: bool,
    },
    Info {
        id: String,
    },
    Projects,
}

#[derive(Parser, Debug)]
#[command(name = "planner", disable_help_subcommand = true)]
struct CommandLine {
    #[command(subcommand)]
    command: Command,
}

pub fn known_command_names() -> Vec<&'static str> {
    vec![
        "login", "signup", "logout", "whoami", "today", "week", "all", "add", "edit", "done", "cycle",
        "move", "delete", "info", "projects",
    ]
}

/// Exact name, or a prefix matching exactly one command.
pub fn expand_command_abbrev<'a>(token: &str, known: &[&'a str]) -> Option<&'a str> {
    if let Some(exact) = known.iter().copied().find(|name| *name == token) {
        return Some(exact);
    }

    let mut matches = known.iter().copied().filter(|name| name.starts_with(token));
    let first = matches.next()?;
    if matches.next().is_some() {
        None
    } else {
        Some(first)
    }
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

/// Pulls positional `rc.key=value` / `rc.key:value` overrides out of the
/// argument list.
#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> anyhow::Result<PreprocessedArgs> {
    let mut cleaned = Vec::with_capacity(raw.len());
    let mut overrides: Vec<(String, String)> = Vec::new();

    let mut iter = raw.iter().cloned();
    if let Some(bin) = iter.next() {
        cleaned.push(bin);
    }

    for arg in iter {
        let s = arg.to_string_lossy();
        if let Some(rest) = s.strip_prefix("rc.") {
            let parsed = rest
                .split_once('=')
                .or_else(|| rest.split_once(':'))
                .map(|(k, v)| (format!("rc.{k}"), v.to_string()));

            if let Some((k, v)) = parsed {
                debug!(key = %k, value = %v, "captured positional rc override");
                overrides.push((k, v));
                continue;
            }
        }

        cleaned.push(arg);
    }

    Ok(PreprocessedArgs {
        cleaned_args: cleaned,
        rc_overrides: overrides,
    })
}

/// Resolves the trailing arguments into a command, expanding abbreviated
/// command names and falling back to `default.command`.
#[tracing::instrument(skip(cfg, rest))]
pub fn parse_command(cfg: &Config, rest: Vec<OsString>) -> anyhow::Result<Command> {
    let mut tokens: Vec<String> = rest
        .into_iter()
        .map(|arg| arg.to_string_lossy().to_string())
        .collect();

    if tokens.is_empty() {
        let cmd = cfg
            .get("default.command")
            .unwrap_or_else(|| "today".to_string());
        debug!(command = %cmd, "no explicit command, using default");
        tokens.push(cmd);
    }

    let known = known_command_names();
    let full = expand_command_abbrev(&tokens[0], &known).ok_or_else(|| {
        anyhow!(
            "unknown or ambiguous command: {} (expected one of: {})",
            tokens[0],
            known.join(", ")
        )
    })?;
    debug!(token = %tokens[0], expanded = %full, "resolved command token");
    tokens[0] = full.to_string();

    let argv = std::iter::once("planner".to_string()).chain(tokens);
    let parsed = CommandLine::try_parse_from(argv).map_err(|err| anyhow!("{err}"))?;
    Ok(parsed.command)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn os(args: &[&str]) -> Vec<OsString> {
        args.iter().map(OsString::from).collect()
    }

    #[test]
    fn pulls_rc_overrides_out_of_args() {
        let pre = preprocess_args(&os(&["planner", "rc.color=off", "today", "rc.offline:on"]))
            .expect("preprocess");
        assert_eq!(pre.cleaned_args, os(&["planner", "today"]));
        assert_eq!(
            pre.rc_overrides,
            vec![
                ("rc.color".to_string(), "off".to_string()),
                ("rc.offline".to_string(), "on".to_string()),
            ]
        );
    }

    #[test]
    fn expands_unique_prefixes_only() {
        let known = known_command_names();
        assert_eq!(expand_command_abbrev("we", &known), Some("week"));
        assert_eq!(expand_command_abbrev("all", &known), Some("all"));
        assert_eq!(expand_command_abbrev("d", &known), None);
        assert_eq!(expand_command_abbrev("del", &known), Some("delete"));
    }

    #[test]
    fn parses_commands_with_default_and_fields() {
        let cfg = Config::default();
        assert_eq!(parse_command(&cfg, vec![]).expect("default"), Command::Today);

        let command = parse_command(
            &cfg,
            os(&["add", "Pay", "rent", "--priority", "high", "--scheduled", "tomorrow"]),
        )
        .expect("add");
        let Command::Add { title, fields } = command else {
            panic!("expected add");
        };
        assert_eq!(title, vec!["Pay".to_string(), "rent".to_string()]);
        assert_eq!(fields.priority.as_deref(), Some("high"));
        assert_eq!(fields.scheduled.as_deref(), Some("tomorrow"));

        assert_eq!(
            parse_command(&cfg, os(&["mo", "abc123", "none", "--yes"])).expect("move"),
            Command::Move {
                id: "abc123".to_string(),
                target: "none".to_string(),
                yes: true,
            }
        );
        assert!(parse_command(&cfg, os(&["frobnicate"])).is_err());
    }
}
