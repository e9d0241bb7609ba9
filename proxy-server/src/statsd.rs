use proxy_stats::{CounterMetric, GaugeMetric, HistogramMetric};

/// Counter metrics emitted by the HTTP server.
pub enum ServerCounters {
    /// Number of handled HTTP requests.
    ///
    /// This metric is tagged with:
    ///  - `method`: The HTTP method of the request.
    ///  - `path`: The matched route, without the root path.
    ///  - `status_code`: The status code of the response.
    Requests,
    /// Number of submissions rejected because they carried no token.
    RequestsWithoutToken,
    /// Number of submissions rejected because their token could not be verified.
    RequestsBadToken,
    /// Number of accepted TCP connections.
    ///
    /// This metric is tagged with:
    ///  - `keepalive`: `ok` or `error` depending on whether TCP keepalive could be set.
    ///  - `nodelay`: `ok` or `error` depending on whether `TCP_NODELAY` could be set.
    SocketAccept,
    /// Number of connections closed after being idle.
    ConnectionIdleTimeout,
}

impl CounterMetric for ServerCounters {
    fn name(&self) -> &'static str {
        match self {
            Self::Requests => "http_requests_total",
            Self::RequestsWithoutToken => "auth_reqs_without_token_total",
            Self::RequestsBadToken => "auth_reqs_bad_token_total",
            Self::SocketAccept => "http_socket_accept_total",
            Self::ConnectionIdleTimeout => "http_connection_idle_timeout_total",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            Self::Requests => "Number of handled HTTP requests.",
            Self::RequestsWithoutToken => "Number of requests without a JWT.",
            Self::RequestsBadToken => "Number of requests with an invalid JWT.",
            Self::SocketAccept => "Number of accepted TCP connections.",
            Self::ConnectionIdleTimeout => "Number of connections closed while idle.",
        }
    }
}

/// Histograms emitted by the HTTP server.
pub enum ServerHistograms {
    /// Time spent handling a request, in seconds.
    ///
    /// Tagged like [`ServerCounters::Requests`].
    RequestDuration,
}

impl HistogramMetric for ServerHistograms {
    fn name(&self) -> &'static str {
        match self {
            Self::RequestDuration => "http_request_time_secs",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            Self::RequestDuration => "Time spent handling HTTP requests in seconds.",
        }
    }
}

/// Gauges emitted by the HTTP server.
pub enum ServerGauges {
    /// Seconds since the server started.
    Uptime,
}

impl GaugeMetric for ServerGauges {
    fn name(&self) -> &'static str {
        match self {
            Self::Uptime => "app_uptime_secs_total",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            Self::Uptime => "Seconds since the proxy started.",
        }
    }
}
