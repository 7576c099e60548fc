use async_trait::async_trait;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, USER_AGENT, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Body, Client};
use url::Url;
use crate::client::{ApiRequest, ApiResponse};
use crate::config::{ClientConfig, Credentials};
use crate::core::{BlobSink, ByteStream, Result, Transport, UploadDescriptor, UploadError};

fn build_client(config: &ClientConfig) -> Result<Client> {
    let mut builder = Client::builder();
    if let Some(timeout) = config.timeout {
        builder = builder.timeout(timeout);
    }

    Ok(builder.build()?)
}

/// JSON API over HTTP with basic or bearer credentials
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    credentials: Credentials,
    user_agent: String,
}

impl HttpTransport {
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let credentials = config.credentials()?;
        // Validate early; requests are built by string concatenation
        Url::parse(&config.url)?;

        Ok(Self {
            client: build_client(config)?,
            base_url: config.url.trim_end_matches('/').to_string(),
            credentials,
            user_agent: config.user_agent.clone(),
        })
    }

    pub fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        let mut builder = self
            .client
            .request(request.method, self.url_for(&request.path))
            .header(USER_AGENT, self.user_agent.as_str());

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }

        builder = match &self.credentials {
            Credentials::Basic { user, pass } => builder.basic_auth(user, Some(pass)),
            Credentials::Token(token) => builder.bearer_auth(token),
        };

        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;

        Ok(ApiResponse::new(status, text))
    }
}

/// Streams payloads to signed storage urls
#[derive(Debug, Clone)]
pub struct HttpBlobSink {
    client: Client,
}

impl HttpBlobSink {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        Ok(Self::new(build_client(config)?))
    }

    fn headers_for(target: &UploadDescriptor, content_length: u64, content_type: &str) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert("x-amz-acl", HeaderValue::from_static("public-read"));
        headers.insert(CONTENT_LENGTH, HeaderValue::from(content_length));
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_str(content_type)
                .map_err(|err| UploadError::config_error(format!("Invalid content type: {}", err)))?,
        );

        for (name, value) in &target.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|err| UploadError::config_error(format!("Invalid header name {}: {}", name, err)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|err| UploadError::config_error(format!("Invalid header value: {}", err)))?;
            headers.insert(name, value);
        }

        Ok(headers)
    }
}

#[async_trait]
impl BlobSink for HttpBlobSink {
    async fn put(
        &self,
        target: &UploadDescriptor,
        body: ByteStream,
        content_length: u64,
        content_type: &str,
    ) -> Result<ApiResponse> {
        let headers = Self::headers_for(target, content_length, content_type)?;

        let response = self
            .client
            .put(&target.url)
            .headers(headers)
            .body(Body::wrap_stream(body))
            .send()
            .await?;

        let status = response.status().as_u16();
        let text = response.text().await?;

        Ok(ApiResponse::new(status, text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_transport_requires_credentials() {
        let err = HttpTransport::from_config(&ClientConfig::default()).unwrap_err();
        assert!(matches!(err, UploadError::Config(_)));
    }

    #[test]
    fn test_transport_url() {
        let config = ClientConfig::default()
            .with_url("http://localhost:3030/1/")
            .with_token("abc");
        let transport = HttpTransport::from_config(&config).unwrap();
        assert_eq!(transport.url_for("/streams"), "http://localhost:3030/1/streams");
    }

    #[test]
    fn test_invalid_base_url() {
        let config = ClientConfig::default().with_url("not a url").with_token("abc");
        let err = HttpTransport::from_config(&config).unwrap_err();
        assert!(matches!(err, UploadError::InvalidUrl(_)));
    }

    #[test]
    fn test_sink_headers() {
        let mut extra = BTreeMap::new();
        extra.insert("x-amz-security-token".to_string(), "tok".to_string());
        let target = UploadDescriptor {
            url: "https://bucket/key".to_string(),
            key: None,
            headers: extra,
        };

        let headers = HttpBlobSink::headers_for(&target, 42, "image/png").unwrap();
        assert_eq!(headers.get(CONTENT_LENGTH).unwrap(), "42");
        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), "image/png");
        assert_eq!(headers.get("x-amz-acl").unwrap(), "public-read");
        assert_eq!(headers.get("x-amz-security-token").unwrap(), "tok");
    }
}
