use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::ArgMatches;
use proxy_config::{Config, OverridableConfig};

use crate::cliapp::make_app;
use crate::setup;

/// The config folder used when `--config` is not given.
const DEFAULT_CONFIG_PATH: &str = ".statsd-http-proxy";

/// Runs the command line application.
pub fn execute() -> Result<()> {
    let app = make_app();
    let matches = app.get_matches();
    let config_path = matches
        .get_one::<PathBuf>("config")
        .map(PathBuf::as_path)
        .unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));

    let mut config = Config::from_path(config_path)?;

    // `run` is the default command, so its flags are accepted on the top level as well.
    let override_matches = match matches.subcommand() {
        Some(("run", run_matches)) => run_matches,
        _ => &matches,
    };
    config.apply_override(extract_config_args(override_matches))?;

    proxy_log::init(config.logging());

    match matches.subcommand() {
        Some(("config", matches)) => manage_config(&config, matches),
        _ => run(config),
    }
}

/// Extracts config overrides from the command line and the environment.
///
/// Flags are passed on as strings and parsed by [`Config::apply_override`], which names the
/// offending field in its error.
pub fn extract_config_args(matches: &ArgMatches) -> OverridableConfig {
    let value = |id: &str| matches.get_one::<String>(id).cloned();
    let flag = |id: &str| matches.get_flag(id).then(|| "true".to_owned());

    OverridableConfig {
        http_host: value("http_host"),
        http_port: value("http_port"),
        http_timeout_read: value("http_timeout_read"),
        http_timeout_write: value("http_timeout_write"),
        http_timeout_idle: value("http_timeout_idle"),
        tls_cert: value("tls_cert"),
        tls_key: value("tls_key"),
        statsd_host: value("statsd_host"),
        statsd_port: value("statsd_port"),
        metric_prefix: value("metric_prefix"),
        jwt_secret: value("jwt_secret"),
        log_level: matches.get_flag("verbose").then(|| "debug".to_owned()),
        prometheus_compat: flag("prometheus_compat"),
        normalize: flag("normalize"),
        queue_size: value("queue_size"),
        workers: value("workers"),
        root_path: value("root_path"),
        shutdown_timeout: None,
    }
}

#[allow(clippy::print_stdout)]
pub fn manage_config(config: &Config, matches: &ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("show", matches)) => {
            match matches.get_one::<String>("format").map(String::as_str) {
                Some("debug") => println!("{config:#?}"),
                _ => {
                    let yaml = config
                        .to_yaml_string()
                        .context("failed to serialize the config")?;
                    print!("{yaml}");
                }
            }
            Ok(())
        }
        _ => unreachable!(),
    }
}

pub fn run(config: Config) -> Result<()> {
    setup::dump_spawn_infos(&config);
    setup::check_config(&config)?;
    setup::init_stats();

    proxy_server::run(config)?;
    Ok(())
}
