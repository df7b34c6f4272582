//! Headless client core for the content-workflow builder: backend API clients,
//! execution streaming, and the post-preview pipeline.
#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(clippy::result_large_err)]

use std::{future::Future, pin::Pin, time::Duration};

/// Backend address used when neither `BACKEND_URL` nor `NEXT_PUBLIC_BACKEND_URL` is set.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// Prefix shared by every API route.
pub const API_PREFIX: &str = "/v1";

/// Value of the client identification header.
pub(crate) const DEFAULT_CLIENT_HEADER: &str =
    concat!("contentflow-rust/", env!("CARGO_PKG_VERSION"));

pub(crate) const CLIENT_HEADER: &str = "X-Contentflow-Client";

/// Default connection timeout (5 seconds).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default timeout for CRUD and compile calls (60 seconds). Execution calls have none.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// HTTP header carrying the request id.
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub mod bridge;
mod client;
mod drafts;
mod errors;
mod http;
pub mod ids;
pub mod preview;
mod read_cache;
pub mod registry;
mod runs;
mod session;
pub mod sse;
pub mod types;
mod workflows;

#[doc(hidden)]
pub mod testing;

pub use client::{Client, Config};
pub use drafts::{DraftsClient, WorkflowDraftSink};
pub use errors::{
    APIError, CompileError, Diagnostic, DiagnosticLevel, Error, Result, TransportError,
    TransportErrorKind, ValidationError,
};
pub use http::{HeaderEntry, HeaderList, RetryConfig};
pub use ids::{DraftId, ExecutionId, NodeId, OutputKey, PlatformId, SlotId, WorkflowId};
pub use read_cache::ReadCacheConfig;
pub use runs::RunsClient;
pub use session::{SessionCache, SessionProvider, DEFAULT_SESSION_TTL};
#[cfg(feature = "streaming")]
pub use sse::ExecutionStream;
pub use sse::{ExecutionEvent, SseDecoder};
pub use workflows::WorkflowsClient;
