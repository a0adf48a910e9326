use std::env;

use anyhow::Context;
use hotshop_server::App;
use hotshop_server::config::loader::{DEFAULT_CONFIG_PATH, load_config};

const CONFIG_ENV: &str = "HOTSHOP_CONFIG";

const USAGE: &str = "usage: hotshop-server [--config <path>] [--check]";

/// Command line of the worker process.
#[derive(Debug, Default, PartialEq, Eq)]
struct Cli {
    /// `--config <path>` or `--config=<path>`
    config: Option<String>,
    /// Validate the configuration and exit.
    check: bool,
}

impl Cli {
    fn parse(args: impl IntoIterator<Item = String>) -> Result<Self, String> {
        let mut cli = Cli::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => {
                    let path = args.next().ok_or("--config requires a path")?;
                    cli.config = Some(path);
                }
                "--check" => cli.check = true,
                other => match other.strip_prefix("--config=") {
                    Some(path) if !path.is_empty() => cli.config = Some(path.to_string()),
                    _ => return Err(format!("unexpected argument {other:?}")),
                },
            }
        }
        Ok(cli)
    }

    /// Config path from the command line, then `HOTSHOP_CONFIG`, then the
    /// default file name.
    fn config_path(&self) -> String {
        self.config
            .clone()
            .or_else(|| env::var(CONFIG_ENV).ok().filter(|p| !p.is_empty()))
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    match dotenvy::dotenv() {
        Ok(_) => {}
        Err(e) if e.not_found() => {}
        Err(e) => eprintln!("Warning: failed to load .env: {e}"),
    }

    let cli = match Cli::parse(env::args().skip(1)) {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("{e}\n{USAGE}");
            std::process::exit(2);
        }
    };

    let config_path = cli.config_path();
    let cfg = match load_config(Some(&config_path)) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error in {config_path}: {e}");
            std::process::exit(2);
        }
    };
    if cli.check {
        println!("{config_path}: ok");
        return Ok(());
    }

    hotshop_server::observability::init_tracing(&cfg.logging);
    tracing::info!(
        path = %config_path,
        strategy = %cfg.cache.strategy,
        storage = ?cfg.storage.backend,
        workers = cfg.seckill.consumer_workers,
        "Configuration loaded"
    );
    hotshop_server::metrics::init_metrics(&cfg.metrics);

    let app = App::build(cfg).await?;
    app.seed().await.context("startup seeding failed")?;
    let consumer = app.start_consumer().await?;

    tracing::info!("Hotshop worker running, press Ctrl-C to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }

    app.shutdown(consumer).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, String> {
        Cli::parse(args.iter().map(|a| a.to_string()))
    }

    #[test]
    fn test_config_flag_forms() {
        assert_eq!(
            parse(&["--config", "a.toml"]).unwrap().config.as_deref(),
            Some("a.toml")
        );
        assert_eq!(
            parse(&["--config=b.toml"]).unwrap().config.as_deref(),
            Some("b.toml")
        );
        assert!(parse(&["--config"]).is_err());
        assert!(parse(&["--config="]).is_err());
    }

    #[test]
    fn test_check_flag_and_unknown_arguments() {
        let cli = parse(&["--check", "--config", "c.toml"]).unwrap();
        assert!(cli.check);
        assert_eq!(cli.config_path(), "c.toml");
        assert!(parse(&["--verbose"]).is_err());
    }
}
