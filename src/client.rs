use std::sync::Arc;
use reqwest::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;
use crate::config::ClientConfig;
use crate::core::{BlobSink, Result, StreamQuery, StreamRecord, Transport, UploadError};
use crate::transport::{HttpBlobSink, HttpTransport};
use crate::upload::Stream;
use crate::user::User;

/// Remote API routes
pub(crate) mod paths {
    pub const STREAMS: &str = "/streams";
    pub const USER: &str = "/user";

    pub fn stream(id: &str) -> String {
        format!("/streams/{}", id)
    }

    pub fn file_data(stream: &str) -> String {
        format!("/files/data/{}", stream)
    }

    pub fn file_url(stream: &str) -> String {
        format!("/files/url/{}", stream)
    }

    pub fn file(id: &str) -> String {
        format!("/files/{}", id)
    }

    pub fn sign(id: &str) -> String {
        format!("/sign/{}", id)
    }
}

/// One request against the JSON API, relative to the transport's base url
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub text: String,
}

impl ApiResponse {
    pub fn new(status: u16, text: impl Into<String>) -> Self {
        Self {
            status,
            text: text.into(),
        }
    }

    pub fn json_body<T: Serialize>(status: u16, body: &T) -> Result<Self> {
        Ok(Self::new(status, serde_json::to_string(body)?))
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.text)?)
    }

    /// Application-level `error` field of a JSON body, if set
    pub fn error_field(&self) -> Option<String> {
        let value: Value = serde_json::from_str(&self.text).ok()?;
        match value.get("error")? {
            Value::Null | Value::Bool(false) => None,
            Value::String(message) => Some(message.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Turn a non-2xx status or an `error` body into an error.
    pub fn error_for_status(self) -> Result<Self> {
        if !self.is_success() {
            return Err(UploadError::api_error(self.status, self.text));
        }
        if let Some(message) = self.error_field() {
            return Err(UploadError::api_error(self.status, message));
        }
        Ok(self)
    }
}

/// Chainable request, sent through the client's transport
#[must_use]
pub struct RequestBuilder {
    client: Client,
    request: ApiRequest,
    error: Option<UploadError>,
}

impl RequestBuilder {
    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.request.query.push((key.into(), value.to_string()));
        self
    }

    pub fn query_pairs<I>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.request.query.extend(pairs);
        self
    }

    /// Serialization errors are reported by `send`.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Self {
        match serde_json::to_value(body) {
            Ok(value) => self.request.body = Some(value),
            Err(err) => self.error = Some(err.into()),
        }
        self
    }

    pub fn build(self) -> Result<ApiRequest> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.request),
        }
    }

    /// Send without inspecting the answer.
    pub async fn send_raw(self) -> Result<ApiResponse> {
        let transport = self.client.inner.transport.clone();
        let request = self.build()?;
        debug!(method = %request.method, path = %request.path, "request");
        transport.send(request).await
    }

    /// Send and convert error answers with [`ApiResponse::error_for_status`].
    pub async fn send(self) -> Result<ApiResponse> {
        self.send_raw().await?.error_for_status()
    }
}

struct ClientInner {
    transport: Arc<dyn Transport>,
    sink: Arc<dyn BlobSink>,
    config: ClientConfig,
}

/// Handle to the remote service. Cheap to clone; streams and items keep one.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("url", &self.inner.config.url)
            .finish()
    }
}

impl Client {
    pub fn new(transport: Arc<dyn Transport>, sink: Arc<dyn BlobSink>, config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                transport,
                sink,
                config,
            }),
        }
    }

    /// Client talking HTTP to `config.url`.
    pub fn from_config(config: ClientConfig) -> Result<Self> {
        let transport = HttpTransport::from_config(&config)?;
        let sink = HttpBlobSink::from_config(&config)?;
        Ok(Self::new(Arc::new(transport), Arc::new(sink), config))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub(crate) fn sink(&self) -> Arc<dyn BlobSink> {
        self.inner.sink.clone()
    }

    pub fn request(&self, method: Method, path: impl Into<String>) -> RequestBuilder {
        RequestBuilder {
            client: self.clone(),
            request: ApiRequest::new(method, path),
            error: None,
        }
    }

    pub fn get(&self, path: impl Into<String>) -> RequestBuilder {
        self.request(Method::GET, path)
    }

    pub fn post(&self, path: impl Into<String>) -> RequestBuilder {
        self.request(Method::POST, path)
    }

    pub fn patch(&self, path: impl Into<String>) -> RequestBuilder {
        self.request(Method::PATCH, path)
    }

    pub fn delete(&self, path: impl Into<String>) -> RequestBuilder {
        self.request(Method::DELETE, path)
    }

    /// New, unsaved stream.
    pub fn stream(&self, title: impl Into<String>) -> Stream {
        Stream::new(self.clone(), StreamRecord {
            title: Some(title.into()),
            ..Default::default()
        })
    }

    /// Handle to an existing remote stream.
    pub fn stream_by_id(&self, id: impl Into<String>) -> Stream {
        Stream::new(self.clone(), StreamRecord {
            id: Some(id.into()),
            ..Default::default()
        })
    }

    pub async fn streams(&self, query: &StreamQuery) -> Result<Vec<Stream>> {
        let records: Vec<StreamRecord> = self
            .get(paths::STREAMS)
            .query_pairs(query.to_pairs())
            .send()
            .await?
            .json()?;

        Ok(records
            .into_iter()
            .map(|record| Stream::new(self.clone(), record))
            .collect())
    }

    /// Account the credentials belong to.
    pub async fn user(&self) -> Result<User> {
        self.get(paths::USER).send().await?.json()
    }
}
