use std::{fmt, sync::Arc, time::Duration};

use reqwest::{
    header::{HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE},
    Method,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::time::{sleep, Instant};

use crate::{
    drafts::DraftsClient,
    errors::{Error, Result, TransportError, TransportErrorKind},
    http::{parse_api_error_parts, HeaderList, RetryConfig},
    read_cache::{ReadCache, ReadCacheConfig},
    runs::RunsClient,
    session::{SessionCache, SessionProvider, DEFAULT_SESSION_TTL},
    workflows::WorkflowsClient,
    API_PREFIX, CLIENT_HEADER, DEFAULT_BASE_URL, DEFAULT_CLIENT_HEADER, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_REQUEST_TIMEOUT, REQUEST_ID_HEADER,
};

/// Environment variables consulted by [`Config::from_env`], in order.
pub const BACKEND_URL_ENV: [&str; 2] = ["BACKEND_URL", "NEXT_PUBLIC_BACKEND_URL"];

#[derive(Clone, Default)]
pub struct Config {
    /// Backend origin; API paths are appended under `/v1`.
    pub base_url: Option<String>,
    /// Static bearer token. Ignored when `session_provider` is set.
    pub access_token: Option<String>,
    pub session_provider: Option<Arc<dyn SessionProvider>>,
    /// Override the session cache TTL (defaults to 30s).
    pub session_ttl: Option<Duration>,
    pub client_header: Option<String>,
    pub http_client: Option<reqwest::Client>,
    /// Override the connect timeout (defaults to 5s).
    pub connect_timeout: Option<Duration>,
    /// Override the CRUD/compile request timeout (defaults to 60s).
    pub timeout: Option<Duration>,
    /// Retry/backoff policy (defaults to 3 attempts for reads, no POST retries).
    pub retry: Option<RetryConfig>,
    /// Default extra headers applied to all requests.
    pub default_headers: Option<HeaderList>,
    /// GET dedup/cache policy (defaults to 10s TTL, 100 entries).
    pub read_cache: Option<ReadCacheConfig>,
}

impl Config {
    /// Config pointing at `BACKEND_URL`, then `NEXT_PUBLIC_BACKEND_URL`, then
    /// [`DEFAULT_BASE_URL`].
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let base_url = BACKEND_URL_ENV
            .iter()
            .filter_map(|key| lookup(key))
            .map(|value| value.trim().to_string())
            .find(|value| !value.is_empty());
        Self {
            base_url,
            ..Default::default()
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("base_url", &self.base_url)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("session_provider", &self.session_provider.is_some())
            .field("session_ttl", &self.session_ttl)
            .field("client_header", &self.client_header)
            .field("connect_timeout", &self.connect_timeout)
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .field("default_headers", &self.default_headers)
            .field("read_cache", &self.read_cache)
            .finish()
    }
}

#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

pub(crate) struct ClientInner {
    base_url: reqwest::Url,
    access_token: Option<String>,
    session: Option<SessionCache>,
    client_header: Option<String>,
    http: reqwest::Client,
    request_timeout: Duration,
    pub(crate) retry: RetryConfig,
    default_headers: Option<HeaderList>,
    reads: ReadCache,
}

impl Client {
    pub fn new(cfg: Config) -> Result<Self> {
        let base_source = cfg
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let base = base_source.trim_end_matches('/').to_string();
        let base_url = reqwest::Url::parse(&base)
            .map_err(|err| Error::Config(format!("invalid base url: {err}")))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::Config(format!("invalid base url: {base}")));
        }

        let connect_timeout = cfg.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT);
        let request_timeout = cfg.timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT);
        let retry = cfg.retry.unwrap_or_default();

        let http = match cfg.http_client {
            Some(client) => client,
            None => reqwest::Client::builder()
                .connect_timeout(connect_timeout)
                .build()
                .map_err(|err| TransportError {
                    kind: TransportErrorKind::Connect,
                    message: "failed to build http client".to_string(),
                    source: Some(err),
                })?,
        };

        let client_header = cfg
            .client_header
            .filter(|s| !s.trim().is_empty())
            .or_else(|| Some(DEFAULT_CLIENT_HEADER.to_string()));

        let session = cfg.session_provider.map(|provider| {
            SessionCache::with_ttl(provider, cfg.session_ttl.unwrap_or(DEFAULT_SESSION_TTL))
        });

        Ok(Self {
            inner: Arc::new(ClientInner {
                base_url,
                access_token: cfg.access_token.filter(|s| !s.trim().is_empty()),
                session,
                client_header,
                http,
                request_timeout,
                retry,
                default_headers: cfg.default_headers,
                reads: ReadCache::new(cfg.read_cache.unwrap_or_default()),
            }),
        })
    }

    /// Client configured from the environment.
    pub fn from_env() -> Result<Self> {
        Self::new(Config::from_env())
    }

    pub fn base_url(&self) -> &str {
        self.inner.base_url.as_str()
    }

    pub fn workflows(&self) -> WorkflowsClient {
        WorkflowsClient {
            inner: self.inner.clone(),
        }
    }

    pub fn runs(&self) -> RunsClient {
        RunsClient {
            inner: self.inner.clone(),
        }
    }

    pub fn drafts(&self) -> DraftsClient {
        DraftsClient {
            inner: self.inner.clone(),
        }
    }
}

fn apply_header_list(
    mut builder: reqwest::RequestBuilder,
    headers: &HeaderList,
) -> Result<reqwest::RequestBuilder> {
    for entry in headers.iter() {
        if !entry.is_valid() {
            continue;
        }
        let name = HeaderName::from_bytes(entry.key.trim().as_bytes())
            .map_err(|err| Error::Config(format!("invalid header name: {err}")))?;
        let val = HeaderValue::from_str(entry.value.trim())
            .map_err(|err| Error::Config(format!("invalid header value: {err}")))?;
        builder = builder.header(name, val);
    }
    Ok(builder)
}

/// `/v1` + `path`.
pub(crate) fn api_path(path: &str) -> String {
    format!("{API_PREFIX}{path}")
}

impl ClientInner {
    pub(crate) fn request(&self, method: Method, path: &str) -> Result<reqwest::RequestBuilder> {
        let mut url = self.base_url.clone();
        let joined = format!("{}{}", url.path().trim_end_matches('/'), path);
        let (route, query) = match joined.split_once('?') {
            Some((route, query)) => (route.to_string(), Some(query.to_string())),
            None => (joined, None),
        };
        url.set_path(&route);
        url.set_query(query.as_deref());
        Ok(self.http.request(method, url))
    }

    pub(crate) async fn with_headers(
        &self,
        mut builder: reqwest::RequestBuilder,
        request_id: Option<&str>,
        headers: &HeaderList,
        accept: Option<&str>,
    ) -> Result<reqwest::RequestBuilder> {
        if let Some(accept) = accept {
            builder = builder.header(ACCEPT, accept);
        }
        if let Some(req_id) = request_id {
            if !req_id.trim().is_empty() {
                builder = builder.header(REQUEST_ID_HEADER, req_id);
            }
        }
        if let Some(client_header) = self.client_header.as_deref() {
            builder = builder.header(CLIENT_HEADER, client_header);
        }
        builder = self.apply_auth(builder).await?;

        if let Some(defaults) = &self.default_headers {
            builder = apply_header_list(builder, defaults)?;
        }
        builder = apply_header_list(builder, headers)?;

        Ok(builder)
    }

    pub(crate) fn with_timeout(
        &self,
        builder: reqwest::RequestBuilder,
        timeout: Option<Duration>,
        use_default: bool,
    ) -> reqwest::RequestBuilder {
        if let Some(duration) = timeout {
            builder.timeout(duration)
        } else if use_default {
            builder.timeout(self.request_timeout)
        } else {
            builder
        }
    }

    async fn apply_auth(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder> {
        let token = match &self.session {
            Some(session) => session.access_token().await?,
            None => self.access_token.clone(),
        };
        let Some(token) = token else {
            return Ok(builder);
        };
        let bearer = token
            .trim()
            .strip_prefix("Bearer ")
            .or_else(|| token.trim().strip_prefix("bearer "))
            .unwrap_or(token.trim())
            .to_string();
        Ok(builder.bearer_auth(bearer))
    }

    /// Cached, deduplicated GET of an API path.
    pub(crate) async fn get_json<T: DeserializeOwned>(self: &Arc<Self>, path: &str) -> Result<T> {
        let inner = self.clone();
        let owned = path.to_string();
        let value = self
            .reads
            .get_or_fetch(path, move || {
                Box::pin(async move {
                    let builder = inner.request(Method::GET, &owned)?;
                    let builder = inner
                        .with_headers(builder, None, &HeaderList::default(), Some("application/json"))
                        .await?;
                    let builder = inner.with_timeout(builder, None, true);
                    inner
                        .execute_json::<Value>(builder, Method::GET, &owned, None)
                        .await
                })
            })
            .await?;
        serde_json::from_value(value).map_err(Error::Serialization)
    }

    /// Send a mutating JSON request and invalidate cached reads it affects.
    pub(crate) async fn send_json<T, B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        use_default_timeout: bool,
    ) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let mut builder = self.request(method.clone(), path)?;
        if let Some(body) = body {
            builder = builder.json(body);
        }
        let builder = self
            .with_headers(builder, None, &HeaderList::default(), Some("application/json"))
            .await?;
        let builder = self.with_timeout(builder, None, use_default_timeout);
        let result = self.execute_json(builder, method, path, None).await;
        self.reads.invalidate_for(path);
        result
    }

    /// Like [`send_json`](Self::send_json) for endpoints whose body is ignored.
    pub(crate) async fn send_empty(&self, method: Method, path: &str) -> Result<()> {
        let builder = self.request(method.clone(), path)?;
        let builder = self
            .with_headers(builder, None, &HeaderList::default(), Some("application/json"))
            .await?;
        let builder = self.with_timeout(builder, None, true);
        let result = self
            .send_with_retry(builder, method, path, self.retry.clone())
            .await
            .map(|_| ());
        self.reads.invalidate_for(path);
        result
    }

    /// POST a JSON body and return the response once it is confirmed to be an
    /// event stream. No client-side timeout applies.
    pub(crate) async fn open_event_stream<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response> {
        let builder = self.request(Method::POST, path)?.json(body);
        let builder = self
            .with_headers(builder, None, &HeaderList::default(), Some("text/event-stream"))
            .await?;
        let builder = self.with_timeout(builder, None, false);
        let resp = self
            .send_with_retry(builder, Method::POST, path, self.retry.clone())
            .await;
        self.reads.invalidate_for(path);
        let resp = resp?;

        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().to_lowercase());
        let is_sse = content_type
            .as_deref()
            .map(|ct| ct.starts_with("text/event-stream"))
            .unwrap_or(false);
        if !is_sse {
            return Err(Error::StreamContentType {
                expected: "text/event-stream",
                received: content_type.unwrap_or_else(|| "<missing>".to_string()),
                status: resp.status().as_u16(),
            });
        }
        Ok(resp)
    }

    pub(crate) fn invalidate_reads(&self, path: &str) {
        self.reads.invalidate_for(path);
    }

    pub(crate) async fn execute_json<T: DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
        method: Method,
        path: &str,
        retry: Option<RetryConfig>,
    ) -> Result<T> {
        let retry_cfg = retry.unwrap_or_else(|| self.retry.clone());
        let resp = self
            .send_with_retry(builder, method, path, retry_cfg)
            .await?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|err| self.to_transport_error(err))?;
        let parsed = serde_json::from_slice::<T>(&bytes).map_err(Error::Serialization)?;
        Ok(parsed)
    }

    pub(crate) async fn send_with_retry(
        &self,
        builder: reqwest::RequestBuilder,
        method: Method,
        path: &str,
        retry: RetryConfig,
    ) -> Result<reqwest::Response> {
        let max_attempts = retry.max_attempts.max(1);
        let start = Instant::now();
        #[cfg(not(feature = "tracing"))]
        let _ = (path, start);

        for attempt in 1..=max_attempts {
            let attempt_builder = builder
                .try_clone()
                .ok_or_else(|| Error::Config("request body is not cloneable for retry".into()))?;
            #[cfg(feature = "tracing")]
            let span = tracing::debug_span!(
                "contentflow.http",
                method = %method,
                path = %path,
                attempt,
                max_attempts
            );
            #[cfg(feature = "tracing")]
            let result = {
                use tracing::Instrument;
                attempt_builder.send().instrument(span.clone()).await
            };
            #[cfg(not(feature = "tracing"))]
            let result = attempt_builder.send().await;

            match result {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        #[cfg(feature = "tracing")]
                        span.in_scope(|| {
                            tracing::debug!(
                                status = %status,
                                elapsed_ms = start.elapsed().as_millis() as u64,
                                "request completed"
                            )
                        });
                        return Ok(resp);
                    }

                    if retry.should_retry_status(&method, status) && attempt < max_attempts {
                        sleep(retry.backoff_delay(attempt)).await;
                        continue;
                    }

                    #[cfg(feature = "tracing")]
                    span.in_scope(|| {
                        tracing::warn!(status = %status, "request failed; returning error")
                    });
                    let headers = resp.headers().clone();
                    let body = resp.text().await.unwrap_or_default();
                    return Err(parse_api_error_parts(status, &headers, body));
                }
                Err(err) => {
                    if retry.should_retry_error(&method, &err) && attempt < max_attempts {
                        sleep(retry.backoff_delay(attempt)).await;
                        continue;
                    }

                    #[cfg(feature = "tracing")]
                    span.in_scope(|| tracing::warn!(error = %err, "transport error"));
                    return Err(self.to_transport_error(err));
                }
            }
        }

        Err(Error::Transport(TransportError {
            kind: TransportErrorKind::Other,
            message: "request failed".to_string(),
            source: None,
        }))
    }

    pub(crate) fn to_transport_error(&self, err: reqwest::Error) -> Error {
        TransportError::from_reqwest(err).into()
    }
}
