//! ShellAI command-line entry point.
//!
//! Without a command, starts an interactive dev session. `-m` without a
//! command sends a single request.

use std::path::Path;

use anyhow::{Result, bail};
use clap::{ArgAction, Parser, Subcommand};
use shellai::core::codec::WireFormat;
use shellai::engine::{Engine, Request};
use shellai::exit_codes;
use shellai::io::completion::HttpCompletion;
use shellai::io::config::{AgentConfig, default_config_path, load_config, write_config};
use shellai::io::console::TerminalConsole;
use shellai::io::history::HistoryStore;
use shellai::io::packages::SystemPackages;
use shellai::io::prompt::Mode;
use shellai::io::system_info::SystemInfo;
use shellai::logging;
use shellai::plan::plan;
use shellai::session::run_session;

#[derive(Debug, Parser)]
#[command(
    name = "shellai",
    version,
    about = "AI-driven script orchestration agent"
)]
struct Cli {
    /// Diagnostics on stderr: -v info, -vv debug, -vvv trace. `RUST_LOG` wins.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Send one request instead of starting a session.
    #[arg(short, long)]
    message: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive conversation; scripts only when asked for.
    Chat,
    /// Interactive task solving with scripts.
    Dev,
    /// One request through the agent.
    Ask {
        #[arg(short, long)]
        message: String,
    },
    /// Install packages.
    Install {
        #[arg(required = true)]
        packages: Vec<String>,
        /// Extra detail for the request.
        #[arg(short, long)]
        message: Option<String>,
    },
    /// Check the status of services.
    Check {
        #[arg(required = true)]
        services: Vec<String>,
        #[arg(short, long)]
        message: Option<String>,
    },
    /// Create a file; the model writes the content.
    Create {
        file: String,
        /// What the file should contain.
        #[arg(short, long)]
        message: Option<String>,
    },
    /// Print one decision in the given format without acting on it.
    Plan {
        #[arg(short, long)]
        message: String,
        #[arg(long, default_value = "xml")]
        format: WireFormat,
    },
    /// Inspect or edit the config file.
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Print the effective config (API key masked).
    Show,
    /// Print the config file location.
    Path,
    /// Set one key and save.
    Set { key: String, value: String },
    /// Write a default config file.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::ERROR);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let config_path = default_config_path()?;
    let command = match (cli.command, cli.message) {
        (Some(command), _) => command,
        (None, Some(message)) => Command::Ask { message },
        (None, None) => Command::Dev,
    };
    let config = || effective_config(&config_path);

    match command {
        Command::Config { action } => cmd_config(&config_path, action),
        Command::Chat => cmd_session(&config()?, Mode::Chat),
        Command::Dev => cmd_session(&config()?, Mode::Dev),
        Command::Ask { message } => cmd_once(&config()?, Request::process(message)),
        Command::Install { packages, message } => cmd_once(
            &config()?,
            Request::process(with_detail(
                format!("Install the following packages: {}.", packages.join(", ")),
                message,
            )),
        ),
        Command::Check { services, message } => cmd_once(
            &config()?,
            Request::process(with_detail(
                format!("Check the status of: {}.", services.join(", ")),
                message,
            )),
        ),
        Command::Create { file, message } => cmd_once(
            &config()?,
            Request::process(with_detail(format!("Create the file {file}."), message)),
        ),
        Command::Plan { message, format } => {
            let config = config()?;
            let completion = HttpCompletion::from_config(&config)?;
            let system_info = system_info(&config);
            println!(
                "{}",
                plan(&config, &completion, &message, format, system_info.as_deref())?
            );
            Ok(exit_codes::OK)
        }
    }
}

/// File config plus environment overrides.
fn effective_config(path: &Path) -> Result<AgentConfig> {
    let mut config = load_config(path)?;
    config.apply_env_overrides(|name| std::env::var(name).ok())?;
    config.validate()?;
    Ok(config)
}

fn with_detail(request: String, detail: Option<String>) -> String {
    match detail.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
        Some(detail) => format!("{request}\n\n{detail}"),
        None => request,
    }
}

fn system_info(config: &AgentConfig) -> Option<String> {
    config
        .send_system_info
        .then(|| SystemInfo::collect().render())
}

fn cmd_once(config: &AgentConfig, request: Request) -> Result<i32> {
    let completion = HttpCompletion::from_config(config)?;
    let packages = SystemPackages::from_config(config);
    let mut console = TerminalConsole::stdio();
    let mut engine = Engine::new(config, &completion, &mut console, &packages, Mode::Dev)?
        .with_system_info(system_info(config));
    Ok(engine.handle(request).exit_code())
}

fn cmd_session(config: &AgentConfig, mode: Mode) -> Result<i32> {
    let completion = HttpCompletion::from_config(config)?;
    let packages = SystemPackages::from_config(config);
    let store = HistoryStore::new(
        config.resolved_history_dir()?.join(mode.history_file()),
        config.history_limit,
    );
    let mut console = TerminalConsole::stdio();
    run_session(
        config,
        &completion,
        &mut console,
        &packages,
        mode,
        &store,
        system_info(config),
    )?;
    Ok(exit_codes::OK)
}

fn cmd_config(path: &Path, action: ConfigCommand) -> Result<i32> {
    match action {
        ConfigCommand::Show => print!("{}", effective_config(path)?.redacted_toml()?),
        ConfigCommand::Path => println!("{}", path.display()),
        ConfigCommand::Set { key, value } => {
            let mut config = load_config(path)?;
            config.set_key(&key, &value)?;
            write_config(path, &config)?;
            println!("Updated {key} in {}", path.display());
        }
        ConfigCommand::Init { force } => {
            if path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
            write_config(path, &AgentConfig::default())?;
            println!("Wrote {}", path.display());
        }
    }
    Ok(exit_codes::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_command_means_dev_session() {
        let cli = Cli::parse_from(["shellai"]);
        assert!(cli.command.is_none());
        assert!(cli.message.is_none());
    }

    #[test]
    fn parses_one_shot_commands() {
        let cli = Cli::parse_from(["shellai", "install", "apache2", "nginx", "-m", "web server"]);
        match cli.command {
            Some(Command::Install { packages, message }) => {
                assert_eq!(packages, vec!["apache2", "nginx"]);
                assert_eq!(message.as_deref(), Some("web server"));
            }
            other => panic!("unexpected {other:?}"),
        }

        let cli = Cli::parse_from(["shellai", "-vv", "plan", "-m", "disk", "--format", "json"]);
        assert_eq!(cli.verbose, 2);
        assert!(matches!(
            cli.command,
            Some(Command::Plan { format: WireFormat::Json, .. })
        ));
    }

    #[test]
    fn rejects_unknown_format() {
        assert!(Cli::try_parse_from(["shellai", "plan", "-m", "x", "--format", "yaml"]).is_err());
    }

    #[test]
    fn detail_is_appended() {
        assert_eq!(
            with_detail("Check the status of: mysql.".to_string(), Some("  ".to_string())),
            "Check the status of: mysql."
        );
        assert_eq!(
            with_detail("Create the file a.html.".to_string(), Some("landing page".to_string())),
            "Create the file a.html.\n\nlanding page"
        );
    }
}
