// Command-line surface of the worker binary
//
// Without a subcommand the binary runs the worker on stdin/stdout. The
// `config` subcommand inspects or regenerates the TOML file and prints the
// endpoints the worker would talk to.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use hwproxy_session::config::{Config, VERSION};
use hwproxy_session::models::ServerProfile;
use std::io::Write;

/// HWProxy session worker - auth and debug-session lifecycle for HWProxy
#[derive(Parser)]
#[command(name = "hwproxy-session")]
#[command(version = VERSION)]
#[command(
    about = "Background worker managing HWProxy logins and debug sessions",
    long_about = "Reads JSON commands (one per line) on stdin and writes JSON events to stdout.\n\
                  Example: {\"message\": \"login\"}"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Inspect or regenerate the config file
    Config(ConfigArgs),
}

#[derive(Args)]
pub struct ConfigArgs {
    #[command(flatten)]
    action: ConfigAction,

    /// Skip the overwrite prompt of --reset
    #[arg(long, requires = "reset")]
    yes: bool,
}

/// Exactly one action per invocation
#[derive(Args)]
#[group(required = true, multiple = false)]
struct ConfigAction {
    /// Print the effective configuration (env > file > defaults)
    #[arg(long)]
    show: bool,

    /// Overwrite the config file with defaults
    #[arg(long)]
    reset: bool,

    /// Print the config file location
    #[arg(long)]
    path: bool,

    /// Print backend and HWProxy URLs for every profile and server
    #[arg(long)]
    endpoints: bool,
}

/// Run a subcommand if one was given. Returns true when the process should exit.
pub fn handle_cli() -> Result<bool> {
    let Some(Commands::Config(args)) = Cli::parse().command else {
        return Ok(false);
    };

    let action = args.action;
    if action.path {
        println!("{}", config_path()?.display());
    } else if action.show {
        show_config()?;
    } else if action.reset {
        reset_config(args.yes)?;
    } else if action.endpoints {
        show_endpoints()?;
    }
    Ok(true)
}

fn config_path() -> Result<std::path::PathBuf> {
    Config::config_path().context("Could not determine config path")
}

fn show_config() -> Result<()> {
    let config = Config::load()?;
    let path = config_path()?;

    println!("# Effective configuration (env > file > defaults)");
    if path.exists() {
        println!("# Source: {}", path.display());
    } else {
        println!("# Source: defaults (no config file)");
    }
    println!();
    print!("{}", config.to_toml());
    Ok(())
}

fn show_endpoints() -> Result<()> {
    let config = Config::load()?;

    for profile in [ServerProfile::Prod, ServerProfile::Dev] {
        let marker = if profile == config.profile { " (active)" } else { "" };
        let url = config.backend.base_url(profile);
        println!("backend {:<5} {}{}", profile.as_str(), url, marker);
    }
    for server in &config.hwproxy.servers {
        let marker = if *server == config.hwproxy.primary { " (primary)" } else { "" };
        let url = config.hwproxy.server_url(*server);
        println!("hwproxy {:<5} {}{}", server.as_str(), url, marker);
    }
    Ok(())
}

fn reset_config(assume_yes: bool) -> Result<()> {
    let path = config_path()?;

    if path.exists() && !assume_yes && !confirm(&format!("Overwrite {}? [y/N] ", path.display())) {
        bail!("Reset aborted, {} left unchanged", path.display());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(&path, Config::default().to_toml())
        .with_context(|| format!("Failed to write {}", path.display()))?;

    println!("Config reset to defaults: {}", path.display());
    Ok(())
}

/// Anything but "y" is a no
fn confirm(prompt: &str) -> bool {
    eprint!("{}", prompt);
    if std::io::stderr().flush().is_err() {
        return false;
    }

    let mut input = String::new();
    std::io::stdin().read_line(&mut input).is_ok() && input.trim().eq_ignore_ascii_case("y")
}
