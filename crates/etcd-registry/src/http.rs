//! HTTP request engine with retries, failover, and redirect handling
//!
//! Every store call goes through [`RequestEngine::execute`], which tries each
//! host in the pool at most once, follows a single redirect per attempt, and
//! maps HTTP statuses onto success, not-found, or a terminal error.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use etcd_registry_api::EtcdErrorBody;
use rand::Rng;
use reqwest::header::LOCATION;
use reqwest::{Client, Method, StatusCode, Url, redirect};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::config::RegistryConfig;
use crate::error::{RegistryError, Result};
use crate::pool::HostPool;

/// Header carrying the store's current index
pub const ETCD_INDEX_HEADER: &str = "x-etcd-index";

/// One logical store operation
#[derive(Clone, Debug)]
pub struct StoreRequest {
    pub method: Method,
    /// Store-relative path, e.g. `/v2/keys/services/web`
    pub path: String,
    pub query: Vec<(String, String)>,
    pub form: Vec<(String, String)>,
    /// Overrides the engine's read timeout
    pub timeout: Option<Duration>,
}

impl StoreRequest {
    pub fn new(method: Method, path: &str) -> Self {
        Self {
            method,
            path: path.to_string(),
            query: Vec::new(),
            form: Vec::new(),
            timeout: None,
        }
    }

    pub fn get(path: &str) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn put(path: &str) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: &str) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn with_query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_form(mut self, key: &str, value: impl ToString) -> Self {
        self.form.push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A successful store response
#[derive(Clone, Debug)]
pub struct StoreReply {
    pub status: StatusCode,
    /// Value of the `X-Etcd-Index` header, when present
    pub etcd_index: Option<u64>,
    pub body: Bytes,
}

impl StoreReply {
    /// Decode the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Result of a single HTTP attempt against one host
enum Attempt {
    Reply(StoreReply),
    Redirect {
        status: StatusCode,
        location: Option<String>,
    },
}

/// Executes store requests across the host pool
pub struct RequestEngine {
    client: Client,
    pool: Arc<HostPool>,
    read_timeout: Duration,
    retry_delay: Duration,
}

impl RequestEngine {
    /// Create a new engine over the given pool
    pub fn new(pool: Arc<HostPool>, config: &RegistryConfig) -> Result<Self> {
        // Redirects are followed by hand so they do not consume a retry
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|e| RegistryError::Other(e.into()))?;

        Ok(Self {
            client,
            pool,
            read_timeout: config.read_timeout(),
            retry_delay: config.retry_delay,
        })
    }

    pub fn pool(&self) -> &Arc<HostPool> {
        &self.pool
    }

    /// Build full URL from a base endpoint and a store path
    fn build_url(base: &str, path: &str) -> String {
        format!(
            "{}/{}",
            base.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Execute a request, retrying across hosts on transport failure.
    ///
    /// Returns `Ok(None)` when the store answers 404.
    pub async fn execute(&self, request: &StoreRequest) -> Result<Option<StoreReply>> {
        let hosts = self.pool.snapshot();
        if hosts.is_empty() {
            return Err(RegistryError::NoHosts);
        }

        let mut tries = hosts.len();
        let mut attempts = 0;
        let mut cursor = rand::rng().random_range(0..hosts.len());
        let mut redirect_target: Option<String> = None;

        loop {
            let following_redirect = redirect_target.is_some();
            let url = match redirect_target.take() {
                Some(location) => location,
                None => {
                    let base = &hosts[cursor % hosts.len()];
                    cursor += 1;
                    Self::build_url(base, &request.path)
                }
            };

            match self.attempt(&url, request).await {
                Ok(Attempt::Redirect {
                    location: Some(location),
                    ..
                }) if !following_redirect => {
                    let target = resolve_location(&url, &location);
                    debug!("Following redirect from {} to {}", url, target);
                    redirect_target = Some(target);
                }
                Ok(Attempt::Redirect { status, location }) => {
                    return Err(RegistryError::Store {
                        status: status.as_u16(),
                        message: format!(
                            "unexpected redirect from {} to {}",
                            url,
                            location.unwrap_or_default()
                        ),
                    });
                }
                Ok(Attempt::Reply(reply)) => return Self::handle_reply(reply),
                Err(e) => {
                    attempts += 1;
                    tries -= 1;
                    if tries == 0 {
                        return Err(RegistryError::Transport {
                            attempts,
                            source: e,
                        });
                    }
                    warn!(
                        "Request to {} failed: {}, retrying on next host ({} left)",
                        url, e, tries
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
    }

    /// Execute a request and decode a JSON body
    pub async fn execute_json<T: DeserializeOwned>(
        &self,
        request: &StoreRequest,
    ) -> Result<Option<T>> {
        match self.execute(request).await? {
            Some(reply) => reply.json().map(Some),
            None => Ok(None),
        }
    }

    async fn attempt(
        &self,
        url: &str,
        request: &StoreRequest,
    ) -> std::result::Result<Attempt, reqwest::Error> {
        let mut builder = self
            .client
            .request(request.method.clone(), url)
            .timeout(request.timeout.unwrap_or(self.read_timeout));
        // Redirect targets already carry the original query string
        if !request.query.is_empty() && !url.contains('?') {
            builder = builder.query(&request.query);
        }
        if !request.form.is_empty() {
            builder = builder.form(&request.form);
        }

        let response = builder.send().await?;
        let status = response.status();

        if status.is_redirection() {
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            return Ok(Attempt::Redirect { status, location });
        }

        let etcd_index = response
            .headers()
            .get(ETCD_INDEX_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        let body = response.bytes().await?;

        Ok(Attempt::Reply(StoreReply {
            status,
            etcd_index,
            body,
        }))
    }

    /// Map a final response onto success, not-found, or a store error
    fn handle_reply(reply: StoreReply) -> Result<Option<StoreReply>> {
        if reply.status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if reply.status.as_u16() > 299 {
            let message = serde_json::from_slice::<EtcdErrorBody>(&reply.body)
                .map(|e| e.describe())
                .unwrap_or_else(|_| reply.text());
            return Err(RegistryError::Store {
                status: reply.status.as_u16(),
                message,
            });
        }
        Ok(Some(reply))
    }
}

/// Resolve a possibly relative `Location` header against the request URL
fn resolve_location(current: &str, location: &str) -> String {
    Url::parse(current)
        .and_then(|base| base.join(location))
        .map(|url| url.to_string())
        .unwrap_or_else(|_| location.to_string())
}
