//! Network transport for push requests.
//!
//! The [`Transport`] trait is the seam between the push logic and the wire.
//! [`HttpTransport`] is the production implementation, a pooled
//! [`reqwest::Client`] safe for concurrent use by every virtual user.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{
    Url,
    header::{CONTENT_ENCODING, CONTENT_TYPE},
};

/// Header carrying the tenant of a push request.
pub const TENANT_HEADER: &str = "X-Scope-OrgID";

/// Errors produced by a [`Transport`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The HTTP client could not be built
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    /// The request failed before a response arrived
    #[error("Failed to send push request: {0}")]
    Request(#[source] reqwest::Error),
    /// No connection to the backend could be established
    #[error("Connection failed: {0}")]
    Connection(String),
}

impl Error {
    /// True if resending the same request cannot succeed.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        match self {
            Error::Client(_) => true,
            Error::Request(e) => e.is_builder(),
            Error::Connection(_) => false,
        }
    }
}

/// A push request ready for the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Sent in [`TENANT_HEADER`] when present
    pub tenant: Option<String>,
    /// The body, gzipped if `gzip` is set
    pub body: Bytes,
    /// Whether the body is gzipped
    pub gzip: bool,
}

/// The part of a response the push logic cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// HTTP status code
    pub status: u16,
    /// Response body, kept for error reporting only
    pub body: String,
}

/// Sends push requests. Implementations are shared by every virtual user of
/// a session and must be safe for concurrent use.
#[async_trait]
pub trait Transport: fmt::Debug + Send + Sync {
    /// Send one request and wait for its response. Timeouts are imposed by
    /// the caller.
    async fn send(&self, request: &Request) -> Result<Response, Error>;
}

/// HTTP transport backed by a pooled [`reqwest::Client`].
///
/// Basic auth credentials embedded in the URL are sent by the client as an
/// `Authorization` header.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: Url,
}

impl HttpTransport {
    /// Create a new [`HttpTransport`] posting to `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn new(url: Url) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("logpush/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(Error::Client)?;
        Ok(Self { client, url })
    }

    /// The URL requests are posted to.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &Request) -> Result<Response, Error> {
        let mut builder = self
            .client
            .post(self.url.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(request.body.clone());
        if let Some(tenant) = &request.tenant {
            builder = builder.header(TENANT_HEADER, tenant.as_str());
        }
        if request.gzip {
            builder = builder.header(CONTENT_ENCODING, "gzip");
        }
        let response = builder.send().await.map_err(|err| {
            if err.is_connect() {
                Error::Connection(err.to_string())
            } else {
                Error::Request(err)
            }
        })?;
        let status = response.status();
        let body = if status.is_success() {
            String::new()
        } else {
            response.text().await.unwrap_or_default()
        };
        Ok(Response {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use std::{
        collections::VecDeque,
        sync::{Arc, Mutex},
    };

    use async_trait::async_trait;

    use super::{Error, Request, Response, Transport};

    /// How the fake answers one request.
    #[derive(Debug, Clone, Copy)]
    pub(crate) enum Reply {
        Status(u16),
        Refuse,
        Hang,
    }

    /// Records every request and answers from a script.
    #[derive(Debug)]
    pub(crate) struct Fake {
        requests: Mutex<Vec<Request>>,
        script: Mutex<VecDeque<Reply>>,
        otherwise: Reply,
    }

    impl Fake {
        pub(crate) fn always(reply: Reply) -> Arc<Self> {
            Self::scripted(Vec::new(), reply)
        }

        pub(crate) fn ok() -> Arc<Self> {
            Self::always(Reply::Status(204))
        }

        pub(crate) fn scripted(script: Vec<Reply>, otherwise: Reply) -> Arc<Self> {
            Arc::new(Self {
                requests: Mutex::new(Vec::new()),
                script: Mutex::new(script.into()),
                otherwise,
            })
        }

        pub(crate) fn requests(&self) -> Vec<Request> {
            self.requests.lock().expect("lock").clone()
        }

        pub(crate) fn calls(&self) -> usize {
            self.requests.lock().expect("lock").len()
        }

        /// Every request body parsed back into JSON.
        pub(crate) fn bodies(&self) -> Vec<serde_json::Value> {
            self.requests()
                .iter()
                .map(|r| serde_json::from_slice(&r.body).expect("json body"))
                .collect()
        }
    }

    #[async_trait]
    impl Transport for Fake {
        async fn send(&self, request: &Request) -> Result<Response, Error> {
            self.requests.lock().expect("lock").push(request.clone());
            let reply = self
                .script
                .lock()
                .expect("lock")
                .pop_front()
                .unwrap_or(self.otherwise);
            match reply {
                Reply::Status(status) => Ok(Response {
                    status,
                    body: String::new(),
                }),
                Reply::Refuse => Err(Error::Connection("connection refused".to_string())),
                Reply::Hang => std::future::pending().await,
            }
        }
    }
}
