use std::sync::Arc;
use std::time::{Duration, Instant};

use proxy_auth::JwtVerifier;
use proxy_config::Config;

use crate::pipeline::Pipeline;

struct StateInner {
    config: Arc<Config>,
    pipeline: Arc<Pipeline>,
    verifier: Option<JwtVerifier>,
    started: Instant,
}

/// Server state shared by all endpoints.
#[derive(Clone)]
pub struct ServiceState {
    inner: Arc<StateInner>,
}

impl ServiceState {
    /// Creates the state from the config and the running pipeline.
    pub fn new(config: Arc<Config>, pipeline: Arc<Pipeline>) -> Self {
        let verifier = config.jwt_secret().map(JwtVerifier::new);

        Self {
            inner: Arc::new(StateInner {
                config,
                pipeline,
                verifier,
                started: Instant::now(),
            }),
        }
    }

    /// Returns the current config.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Returns the pipeline that submissions are queued on.
    pub fn pipeline(&self) -> &Pipeline {
        &self.inner.pipeline
    }

    /// Returns the token verifier, if authentication is enabled.
    pub fn verifier(&self) -> Option<&JwtVerifier> {
        self.inner.verifier.as_ref()
    }

    /// Returns the time since the state was created.
    pub fn uptime(&self) -> Duration {
        self.inner.started.elapsed()
    }
}
