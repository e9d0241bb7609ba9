use std::io;
use std::pin::Pin;
use std::time::Duration;

use axum_server::accept::Accept;
use proxy_stats::metric;
use socket2::TcpKeepalive;
use tokio::net::TcpStream;

use crate::server::io::IdleTimeout;
use crate::statsd::ServerCounters;

/// Accepts TCP connections, configures their socket options, and closes them when idle.
#[derive(Clone, Debug, Default)]
pub struct ProxyAcceptor {
    tcp_keepalive: Option<TcpKeepalive>,
    idle_timeout: Option<Duration>,
}

impl ProxyAcceptor {
    /// Creates a new acceptor that sets `TCP_NODELAY`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables TCP keepalive probes after `timeout` of inactivity.
    ///
    /// A zero timeout disables keepalive.
    pub fn tcp_keepalive(mut self, timeout: Duration, retries: u32) -> Self {
        self.tcp_keepalive = build_keepalive(timeout, retries);
        self
    }

    /// Closes connections without reads or writes for `timeout`.
    ///
    /// A zero timeout keeps idle connections open.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }
}

impl<S> Accept<TcpStream, S> for ProxyAcceptor {
    type Stream = Pin<Box<IdleTimeout<TcpStream>>>;
    type Service = S;
    type Future = std::future::Ready<io::Result<(Self::Stream, Self::Service)>>;

    fn accept(&self, stream: TcpStream, service: S) -> Self::Future {
        let mut keepalive = "ok";
        let mut nodelay = "ok";

        if let Some(tcp_keepalive) = &self.tcp_keepalive {
            let sock_ref = socket2::SockRef::from(&stream);
            if let Err(e) = sock_ref.set_tcp_keepalive(tcp_keepalive) {
                proxy_log::trace!("error trying to set TCP keepalive: {e}");
                keepalive = "error";
            }
        }

        if let Err(e) = stream.set_nodelay(true) {
            proxy_log::trace!("failed to set TCP_NODELAY: {e}");
            nodelay = "error";
        }

        metric!(
            counter(ServerCounters::SocketAccept) += 1,
            keepalive = keepalive,
            nodelay = nodelay
        );

        // Without an idle timeout, the timer is never reached.
        let timeout = self.idle_timeout.unwrap_or(Duration::from_secs(u32::MAX.into()));
        let stream = Box::pin(IdleTimeout::new(stream, timeout));
        std::future::ready(Ok((stream, service)))
    }
}

fn build_keepalive(timeout: Duration, retries: u32) -> Option<TcpKeepalive> {
    if timeout.is_zero() {
        return None;
    }

    let mut keepalive = TcpKeepalive::new().with_time(timeout);
    #[cfg(not(any(target_os = "openbsd", target_os = "redox", target_os = "solaris")))]
    {
        keepalive = keepalive.with_interval(timeout);
    }

    #[cfg(not(any(
        target_os = "openbsd",
        target_os = "redox",
        target_os = "solaris",
        target_os = "windows"
    )))]
    {
        keepalive = keepalive.with_retries(retries);
    }

    Some(keepalive)
}
