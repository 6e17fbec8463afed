#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::missing_errors_doc)]

mod commands;
mod logging;
mod watch;

use clap::Parser;
use esmdev_core::{load_config, DevConfig};
use miette::{IntoDiagnostic, Result};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "esmdev")]
#[command(author, version, about = "ES module dev server with HMR and dependency prebundling", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted logs
    #[arg(long, global = true)]
    json: bool,

    /// Override the project root
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    /// Path to config file (defaults to esmdev.config.json in the root)
    #[arg(long, short = 'c', global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the dev server (default)
    Dev {
        /// Port to listen on
        #[arg(long, short = 'p', default_value = "3000")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "localhost")]
        host: String,

        /// Open browser automatically
        #[arg(long)]
        open: bool,

        /// Send permissive CORS headers
        #[arg(long)]
        cors: bool,

        /// Disable hot module replacement
        #[arg(long)]
        no_hmr: bool,
    },

    /// Prebundle dependencies reachable from the entries, then exit
    Prebundle,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.json);

    let cwd = cli
        .cwd
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));
    let config = load_config(&cwd, cli.config.as_deref()).into_diagnostic()?;

    let rt = tokio::runtime::Runtime::new().into_diagnostic()?;
    match cli.command.unwrap_or(Commands::Dev {
        port: 3000,
        host: "localhost".to_string(),
        open: false,
        cors: false,
        no_hmr: false,
    }) {
        Commands::Dev {
            port,
            host,
            open,
            cors,
            no_hmr,
        } => {
            let config = apply_flags(config, port, &host, open, cors, no_hmr);
            rt.block_on(commands::dev::run(config))
        }
        Commands::Prebundle => rt.block_on(commands::prebundle::run(config)),
    }
}

/// CLI flags win over the config file when they differ from their defaults.
fn apply_flags(
    mut config: DevConfig,
    port: u16,
    host: &str,
    open: bool,
    cors: bool,
    no_hmr: bool,
) -> DevConfig {
    if port != 3000 {
        config.port = port;
    }
    if host != "localhost" {
        config.host = host.to_string();
    }
    config.open_browser |= open;
    config.cors |= cors;
    if no_hmr {
        config.hmr = false;
    }
    config
}

/// Display `path` relative to `root` when it is inside it.
pub(crate) fn display_relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .display()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let mut config = DevConfig::new(PathBuf::from("/p"));
        config.port = 4000;
        config.host = "0.0.0.0".into();

        let kept = apply_flags(config.clone(), 3000, "localhost", false, false, false);
        assert_eq!(kept.port, 4000);
        assert_eq!(kept.host, "0.0.0.0");
        assert!(kept.hmr);

        let overridden = apply_flags(config, 5000, "127.0.0.1", true, true, true);
        assert_eq!(overridden.port, 5000);
        assert_eq!(overridden.host, "127.0.0.1");
        assert!(overridden.open_browser);
        assert!(overridden.cors);
        assert!(!overridden.hmr);
    }

    #[test]
    fn test_display_relative() {
        assert_eq!(
            display_relative(Path::new("/p"), Path::new("/p/src/a.js")),
            "src/a.js"
        );
        assert_eq!(display_relative(Path::new("/p"), Path::new("/q/a.js")), "/q/a.js");
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from(["esmdev", "-vv", "dev", "--port", "4000", "--no-hmr"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(matches!(
            cli.command,
            Some(Commands::Dev {
                port: 4000,
                no_hmr: true,
                ..
            })
        ));
    }
}
