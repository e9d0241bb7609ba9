use std::net::{SocketAddr, TcpListener};
use std::path::Path;
use std::time::Duration;

use axum_server::tls_rustls::{RustlsAcceptor, RustlsConfig};
use axum_server::{Handle, Server};
use hyper_util::rt::TokioTimer;
use tokio::net::TcpSocket;
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;

use crate::controller::{Shutdown, ShutdownHandle};
use crate::middlewares::{self, CatchPanicLayer};
use crate::service::ServiceState;

mod acceptor;
mod io;

/// Set the number of keep-alive retransmissions to be carried out before declaring that remote end
/// is not available.
const KEEPALIVE_RETRIES: u32 = 5;

/// Size of the queue of pending connections.
const LISTEN_BACKLOG: u32 = 1024;

/// Indicates the type of failure of the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Binding failed.
    #[error("bind to interface failed")]
    BindFailed(#[from] std::io::Error),

    /// The TLS certificate or key could not be loaded.
    #[error("failed to load TLS certificate {}", .path.display())]
    TlsConfig {
        /// Path of the certificate.
        path: std::path::PathBuf,
        /// The underlying read or parse error.
        #[source]
        source: std::io::Error,
    },
}

/// Builds the axum application with all routes and middlewares.
pub fn make_app(state: ServiceState) -> axum::Router {
    let config = state.config();

    let timeout = Some(config.write_timeout())
        .filter(|timeout| !timeout.is_zero())
        .map(TimeoutLayer::new);

    // Layers added first are called first. Requests go from top to bottom, responses from
    // bottom to top.
    let middleware = ServiceBuilder::new()
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middlewares::metrics,
        ))
        .layer(CatchPanicLayer::custom(middlewares::handle_panic))
        .layer(middlewares::trace_http_layer())
        .map_response(middlewares::preflight_no_content)
        .layer(middlewares::cors())
        .option_layer(timeout);

    crate::endpoints::routes(config)
        .layer(middleware)
        .with_state(state)
}

fn listen(addr: SocketAddr) -> Result<TcpListener, ServerError> {
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4(),
        SocketAddr::V6(_) => TcpSocket::new_v6(),
    }?;

    #[cfg(all(unix, not(target_os = "solaris"), not(target_os = "illumos")))]
    socket.set_reuseport(true)?;
    socket.bind(addr)?;
    Ok(socket.listen(LISTEN_BACKLOG)?.into_std()?)
}

async fn load_tls(cert: &Path, key: &Path) -> Result<RustlsConfig, ServerError> {
    // Fails only if a provider is installed already, which is then used instead.
    let _ = rustls::crypto::ring::default_provider().install_default();

    RustlsConfig::from_pem_file(cert, key)
        .await
        .map_err(|source| ServerError::TlsConfig {
            path: cert.to_path_buf(),
            source,
        })
}

fn configure_http1<A>(server: &mut Server<A>, read_timeout: Duration) {
    let mut http1 = server.http_builder().http1();
    http1
        .timer(TokioTimer::new())
        .half_close(true)
        .keep_alive(true)
        .writev(true);

    if !read_timeout.is_zero() {
        http1.header_read_timeout(read_timeout);
    }
}

/// HTTP server of the proxy.
///
/// Serves the [endpoints](crate::endpoints) until a [`Shutdown`] is broadcast. On shutdown, the
/// metric queue is closed first, then open connections get the shutdown timeout to complete.
///
/// When a certificate and key are configured, connections are served over HTTPS.
pub struct HttpServer {
    state: ServiceState,
    listener: TcpListener,
    tls: Option<RustlsConfig>,
}

impl HttpServer {
    /// Loads the TLS certificate, if any, and binds the listening socket.
    pub async fn new(state: ServiceState) -> Result<Self, ServerError> {
        let config = state.config();

        let tls = match config.tls_paths() {
            Some((cert, key)) => Some(load_tls(cert, key).await?),
            None => None,
        };

        let listener = listen(config.listen_addr())?;
        Ok(Self {
            state,
            listener,
            tls,
        })
    }

    /// Returns the address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Returns `true` if connections are served over HTTPS.
    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// Serves requests until the shutdown has completed.
    pub async fn run(self, shutdown: ShutdownHandle) -> std::io::Result<()> {
        let Self {
            state,
            listener,
            tls,
        } = self;
        let config = state.config();

        let scheme = if tls.is_some() { "https" } else { "http" };
        proxy_log::info!("spawning http server");
        proxy_log::info!("  listening on {scheme}://{}/", listener.local_addr()?);

        let handle = Handle::new();
        let acceptor = self::acceptor::ProxyAcceptor::new()
            .tcp_keepalive(config.idle_timeout(), KEEPALIVE_RETRIES)
            .idle_timeout(config.idle_timeout());
        let server = axum_server::from_tcp(listener).handle(handle.clone());
        let read_timeout = config.read_timeout();

        tokio::spawn(watch_shutdown(shutdown, state.clone(), handle));

        let app = make_app(state).into_make_service();
        match tls {
            Some(tls) => {
                let mut server = server.acceptor(RustlsAcceptor::new(tls).acceptor(acceptor));
                configure_http1(&mut server, read_timeout);
                server.serve(app).await
            }
            None => {
                let mut server = server.acceptor(acceptor);
                configure_http1(&mut server, read_timeout);
                server.serve(app).await
            }
        }
    }
}

async fn watch_shutdown(mut shutdown: ShutdownHandle, state: ServiceState, handle: Handle) {
    let Shutdown { timeout } = shutdown.notified().await;
    proxy_log::info!("shutting down HTTP server");

    state.pipeline().close();

    match timeout {
        Some(timeout) => handle.graceful_shutdown(Some(timeout)),
        None => handle.shutdown(),
    }
}
