mod auth;
mod cache;
mod config;
mod controller;
mod directory;
mod favorites;
mod listens;
mod models;
mod mpv;
mod player;
mod radio_browser;
mod regions;
mod storage;
mod ui;
mod webhook;

use anyhow::{Context, Result};
use clap::{command, Arg, ArgMatches, Command};
use config::AppConfig;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    command!()
        .subcommand(Command::new("shell").about("Browse and play stations (default)"))
        .subcommand(
            Command::new("webhook")
                .about("Serve the payment webhook that grants premium")
                .arg(
                    Arg::new("bind")
                        .long("bind")
                        .value_name("ADDR")
                        .env("FREQHUB_WEBHOOK_BIND")
                        .help("Listen address, overrides webhook_bind from the config"),
                )
                .arg(
                    Arg::new("service-key")
                        .long("service-key")
                        .value_name("KEY")
                        .env("SUPABASE_SERVICE_ROLE_KEY")
                        .hide_env_values(true)
                        .required(true)
                        .help("Service-role key for the identity admin API"),
                ),
        )
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let matches = cli().get_matches();
    let config = AppConfig::load()?;

    match matches.subcommand() {
        Some(("webhook", sub)) => run_webhook(config, sub),
        _ => run_shell(config),
    }
}

fn run_shell(config: AppConfig) -> Result<()> {
    let handle = controller::start_controller(config);
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;
    let res = rt.block_on(ui::run(&handle));
    // The controller joins its own runtime thread on drop.
    drop(rt);
    drop(handle);
    res
}

fn run_webhook(config: AppConfig, sub: &ArgMatches) -> Result<()> {
    let project_url = config
        .supabase_url
        .as_deref()
        .context("supabase_url is not configured (set SUPABASE_URL)")?;
    let service_key = sub
        .get_one::<String>("service-key")
        .context("Missing service-role key")?;
    let bind = sub
        .get_one::<String>("bind")
        .cloned()
        .unwrap_or_else(|| config.webhook_bind.clone());

    let grant = Arc::new(webhook::GoTrueAdmin::new(project_url, service_key)?);
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;
    rt.block_on(webhook::serve(&bind, grant))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_is_well_formed() {
        cli().debug_assert();
    }

    #[test]
    fn shell_is_the_default() {
        let m = cli().try_get_matches_from(["freqhub"]).unwrap();
        assert!(m.subcommand().is_none());
    }

    #[test]
    fn webhook_takes_bind_and_key() {
        let m = cli()
            .try_get_matches_from([
                "freqhub",
                "webhook",
                "--bind",
                "0.0.0.0:9000",
                "--service-key",
                "k",
            ])
            .unwrap();
        let (name, sub) = m.subcommand().unwrap();
        assert_eq!(name, "webhook");
        assert_eq!(sub.get_one::<String>("bind").unwrap(), "0.0.0.0:9000");
    }
}
