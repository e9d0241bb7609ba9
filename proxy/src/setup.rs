use anyhow::Result;
use proxy_config::Config;

pub fn check_config(config: &Config) -> Result<()> {
    if config.statsd_host().is_empty() {
        anyhow::bail!("no StatsD host configured, set `statsd.host` or pass --statsd-host");
    }

    if config.write_timeout().is_zero() {
        proxy_log::warn!("write timeout is disabled, slow requests are never aborted");
    }

    Ok(())
}

/// Print spawn infos to the log.
pub fn dump_spawn_infos(config: &Config) {
    if config.path().as_os_str().is_empty() {
        proxy_log::info!("launching proxy without config folder");
    } else {
        proxy_log::info!(
            "launching proxy from config folder {}",
            config.path().display()
        );
    }

    let scheme = if config.tls_paths().is_some() { "https" } else { "http" };
    proxy_log::info!("  listening on: {scheme}://{}", config.listen_addr());
    proxy_log::info!("  statsd: {}", config.statsd_addr());

    let prefix = config.metric_prefix();
    if prefix.is_empty() {
        proxy_log::info!("  metric prefix: -");
    } else {
        proxy_log::info!("  metric prefix: {prefix}");
    }

    proxy_log::info!(
        "  workers: {} (queue size {})",
        config.workers(),
        config.queue_size()
    );
    proxy_log::info!(
        "  authentication: {}",
        if config.jwt_secret().is_some() { "jwt" } else { "off" }
    );
    proxy_log::info!("  log level: {}", config.logging().level);
}

/// Initialize the registry of the internal operation counters.
///
/// This must run before the runtime and the worker threads are spawned, so that they all record
/// into the same registry.
pub fn init_stats() {
    proxy_stats::init();
}
