//! This module implements the definition of the command line app.

use clap::builder::ValueParser;
use clap::{Arg, ArgAction, Command, ValueHint};

const ABOUT: &str = "HTTP to StatsD proxy.

Accepts metrics as JSON over HTTP, validates and normalizes them and forwards them to a StatsD \
daemon. All options of the `run` command can also be passed as environment variables with the \
STATSD_PROXY_ prefix.";

pub fn make_app() -> Command {
    Command::new("statsd-http-proxy")
        .disable_help_subcommand(true)
        .subcommand_required(false)
        .propagate_version(true)
        .max_term_width(79)
        .version(env!("CARGO_PKG_VERSION"))
        .about(ABOUT)
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .global(true)
                .value_hint(ValueHint::DirPath)
                .value_parser(ValueParser::path_buf())
                .env("STATSD_PROXY_CONFIG")
                .help("The path to the config folder."),
        )
        .args(run_args())
        .subcommand(make_run_command())
        .subcommand(
            Command::new("config")
                .about("Manage the proxy config")
                .after_help(
                    "This command provides basic config management.  It can be \
                     used primarily to inspect the effective configuration.",
                )
                .subcommand_required(true)
                .subcommand(
                    Command::new("show")
                        .about("Show the entire config out for debugging purposes")
                        .arg(
                            Arg::new("format")
                                .short('f')
                                .long("format")
                                .default_value("yaml")
                                .help("The output format")
                                .value_parser(["debug", "yaml"]),
                        ),
                ),
        )
}

/// Flags of `run`. The top-level command accepts them as well, since `run` is the default.
pub fn run_args() -> Vec<Arg> {
    vec![
        Arg::new("http_host")
            .value_name("HOST")
            .long("http-host")
            .env("STATSD_PROXY_HTTP_HOST")
            .help("The network interface the HTTP server binds to."),
        Arg::new("http_port")
            .value_name("PORT")
            .long("http-port")
            .env("STATSD_PROXY_HTTP_PORT")
            .help("The port the HTTP server binds to."),
        Arg::new("http_timeout_read")
            .value_name("SECONDS")
            .long("http-timeout-read")
            .env("STATSD_PROXY_HTTP_TIMEOUT_READ")
            .help("Timeout for reading the request headers, 0 disables it."),
        Arg::new("http_timeout_write")
            .value_name("SECONDS")
            .long("http-timeout-write")
            .env("STATSD_PROXY_HTTP_TIMEOUT_WRITE")
            .help("Timeout for handling a request and writing the response, 0 disables it."),
        Arg::new("http_timeout_idle")
            .value_name("SECONDS")
            .long("http-timeout-idle")
            .env("STATSD_PROXY_HTTP_TIMEOUT_IDLE")
            .help("Timeout for idle keep-alive connections, 0 disables it."),
        Arg::new("tls_cert")
            .value_name("PATH")
            .long("tls-cert")
            .value_hint(ValueHint::FilePath)
            .requires("tls_key")
            .env("STATSD_PROXY_TLS_CERT")
            .help("Path to a TLS certificate."),
        Arg::new("tls_key")
            .value_name("PATH")
            .long("tls-key")
            .value_hint(ValueHint::FilePath)
            .requires("tls_cert")
            .env("STATSD_PROXY_TLS_KEY")
            .help("Path to the private key of the TLS certificate."),
        Arg::new("statsd_host")
            .value_name("HOST")
            .long("statsd-host")
            .env("STATSD_PROXY_STATSD_HOST")
            .help("The host of the StatsD daemon."),
        Arg::new("statsd_port")
            .value_name("PORT")
            .long("statsd-port")
            .env("STATSD_PROXY_STATSD_PORT")
            .help("The UDP port of the StatsD daemon."),
        Arg::new("metric_prefix")
            .value_name("PREFIX")
            .long("metric-prefix")
            .env("STATSD_PROXY_METRIC_PREFIX")
            .help("Prefix prepended to all forwarded metric names."),
        Arg::new("jwt_secret")
            .value_name("SECRET")
            .long("jwt-secret")
            .hide_env_values(true)
            .env("STATSD_PROXY_JWT_SECRET")
            .help("Secret for verifying JSON web tokens. Authentication is off if unset."),
        Arg::new("verbose")
            .long("verbose")
            .short('v')
            .action(ArgAction::SetTrue)
            .env("STATSD_PROXY_VERBOSE")
            .help("Log debug output."),
        Arg::new("prometheus_compat")
            .long("prometheus-compat")
            .action(ArgAction::SetTrue)
            .env("STATSD_PROXY_PROMETHEUS_COMPAT")
            .help("Enforce Prometheus naming rules on metric and tag names."),
        Arg::new("normalize")
            .long("normalize")
            .action(ArgAction::SetTrue)
            .env("STATSD_PROXY_NORMALIZE")
            .help("Lowercase metric names, tag keys and tag values."),
        Arg::new("queue_size")
            .value_name("SIZE")
            .long("queue-size")
            .env("STATSD_PROXY_QUEUE_SIZE")
            .help("Capacity of the ingestion queue."),
        Arg::new("workers")
            .value_name("COUNT")
            .long("workers")
            .env("STATSD_PROXY_WORKERS")
            .help("Number of threads forwarding metrics to StatsD."),
        Arg::new("root_path")
            .value_name("PATH")
            .long("root-path")
            .env("STATSD_PROXY_ROOT_PATH")
            .help("Path prefix of all HTTP routes."),
    ]
}

fn make_run_command() -> Command {
    Command::new("run")
        .about("Run the proxy")
        .after_help(
            "This runs the proxy in the foreground until it's shut down.  It will bind \
             to the port and network interface configured in the config file or given on \
             the command line.",
        )
        .args(run_args())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_is_valid() {
        make_app().debug_assert();
    }

    #[test]
    fn test_run_is_default() {
        let matches = make_app()
            .try_get_matches_from(["statsd-http-proxy", "--http-port", "9000", "--normalize"])
            .unwrap();

        assert!(matches.subcommand().is_none());
        assert_eq!(
            matches.get_one::<String>("http_port").map(String::as_str),
            Some("9000")
        );
        assert!(matches.get_flag("normalize"));
        assert!(!matches.get_flag("verbose"));
    }

    #[test]
    fn test_tls_requires_both() {
        let result = make_app().try_get_matches_from([
            "statsd-http-proxy",
            "run",
            "--tls-cert",
            "cert.pem",
        ]);

        assert!(result.is_err());
    }

    #[test]
    fn test_config_show_format() {
        let matches = make_app()
            .try_get_matches_from(["statsd-http-proxy", "config", "show"])
            .unwrap();

        let (_, config) = matches.subcommand().unwrap();
        let (_, show) = config.subcommand().unwrap();
        assert_eq!(
            show.get_one::<String>("format").map(String::as_str),
            Some("yaml")
        );
    }
}
