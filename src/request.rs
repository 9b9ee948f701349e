//! Request execution and response validation.

use crate::client::Client;
use crate::error::{CouchError, Result};
use crate::pool::Permit;
use bytes::Bytes;
use http::{Method, StatusCode};
use reqwest::blocking::Response as HttpResponse;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{self, Read};

const JSON: &str = "application/json";

/// A single request against the database endpoint.
#[derive(Clone, Debug)]
pub struct Request {
    pub(crate) method: Method,
    pub(crate) url: Url,
    pub(crate) body: Option<Bytes>,
    pub(crate) content_type: Option<String>,
    pub(crate) headers: HeaderMap,
    pub(crate) streaming: bool,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            body: None,
            content_type: None,
            headers: HeaderMap::new(),
            streaming: false,
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn head(url: Url) -> Self {
        Self::new(Method::HEAD, url)
    }

    pub fn put(url: Url) -> Self {
        Self::new(Method::PUT, url)
    }

    pub fn post(url: Url) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn delete(url: Url) -> Self {
        Self::new(Method::DELETE, url)
    }

    /// Attach a raw body with its content type.
    pub fn body(mut self, body: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self.content_type = Some(content_type.into());
        self
    }

    /// Serialize `value` as the JSON body.
    pub fn json<T: Serialize + ?Sized>(self, value: &T) -> Result<Self> {
        let body = serde_json::to_vec(value)?;
        Ok(self.body(body, JSON))
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Mark the request as long-lived, exempting it from the socket timeout.
    pub fn streaming(mut self) -> Self {
        self.streaming = true;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

/// A validated response whose body has not been read yet.
///
/// Holds one of the client's connection slots until dropped.
pub struct Response {
    inner: HttpResponse,
    _permit: Option<Permit>,
}

impl Response {
    pub fn status(&self) -> StatusCode {
        self.inner.status()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    /// Read the whole body.
    pub fn bytes(self) -> Result<Bytes> {
        Ok(self.inner.bytes()?)
    }

    pub fn text(self) -> Result<String> {
        Ok(self.inner.text()?)
    }
}

impl Read for Response {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.inner.status())
            .field("url", &self.inner.url().as_str())
            .finish()
    }
}

/// Error body sent by the server alongside non-2xx statuses.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

impl Client {
    /// Send a request and return the validated, unread response.
    ///
    /// The response body is left untouched, so the caller may stream it.
    /// A transport failure drops the in-flight request and is returned as-is;
    /// nothing is retried.
    pub fn execute(&self, request: Request) -> Result<Response> {
        let Request {
            method,
            url,
            body,
            content_type,
            headers,
            streaming,
        } = request;

        tracing::debug!(%method, %url, ">>");

        // Released when the returned response is dropped.
        let permit = self.gate.as_ref().map(|gate| gate.acquire());

        let mut req = self.inner.request(method.clone(), url.clone()).headers(headers);
        if let Some(content_type) = content_type {
            req = req.header(CONTENT_TYPE, content_type);
        }
        if let Some(body) = body {
            req = req.body(body);
        }
        if !streaming {
            if let Some(timeout) = self.config.socket_timeout {
                req = req.timeout(timeout);
            }
        }

        let resp = match req.send() {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(%method, %url, error = %e, "error executing request");
                return Err(e.into());
            }
        };

        tracing::debug!(status = resp.status().as_u16(), "<<");
        Ok(Response {
            inner: validate(resp)?,
            _permit: permit,
        })
    }

    /// GET a JSON document.
    pub fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let resp = self.execute(Request::get(url))?;
        decode(resp)
    }

    /// PUT a JSON body and decode the JSON reply.
    pub fn put_json<B, T>(&self, url: Url, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let resp = self.execute(Request::put(url).json(body)?)?;
        decode(resp)
    }

    /// POST a JSON body and decode the JSON reply.
    pub fn post_json<B, T>(&self, url: Url, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let resp = self.execute(Request::post(url).json(body)?)?;
        decode(resp)
    }

    /// DELETE a resource and decode the JSON reply.
    pub fn delete_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let resp = self.execute(Request::delete(url))?;
        decode(resp)
    }

    /// HEAD a resource; the response carries headers only.
    pub fn head(&self, url: Url) -> Result<Response> {
        self.execute(Request::head(url))
    }
}

/// Read the whole body and decode it as JSON.
pub(crate) fn decode<T: DeserializeOwned>(resp: Response) -> Result<T> {
    let bytes = resp.bytes()?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Map a response status onto the error taxonomy.
///
/// 200, 201 and 202 pass through. 304, 404 and 409 become their dedicated
/// variants. Everything else is a `Server` error whose message holds the
/// status line and the full body.
pub(crate) fn validate(resp: HttpResponse) -> Result<HttpResponse> {
    let status = resp.status();
    match status.as_u16() {
        200 | 201 | 202 => Ok(resp),
        304 => {
            tracing::debug!(status = 304, "<< not modified");
            Err(CouchError::NotModified)
        }
        404 => {
            let reason = reason_of(status, &read_body(resp));
            tracing::info!(status = 404, %reason, "<< not found");
            Err(CouchError::NotFound { reason })
        }
        409 => {
            let reason = reason_of(status, &read_body(resp));
            tracing::warn!(status = 409, %reason, "<< conflict");
            Err(CouchError::Conflict { reason })
        }
        code => {
            let body = read_body(resp);
            let message = format!("{} {}", status_line(status), body);
            tracing::error!(status = code, %message, "<< request failed");
            Err(CouchError::Server {
                status: code,
                message,
            })
        }
    }
}

// Best-effort; an unreadable body still yields the status classification.
fn read_body(resp: HttpResponse) -> String {
    resp.text().unwrap_or_default()
}

fn status_line(status: StatusCode) -> String {
    match status.canonical_reason() {
        Some(phrase) => format!("{} ({})", status.as_u16(), phrase),
        None => status.as_u16().to_string(),
    }
}

fn reason_of(status: StatusCode, body: &str) -> String {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    parsed
        .reason
        .or(parsed.error)
        .unwrap_or_else(|| status_line(status))
}
