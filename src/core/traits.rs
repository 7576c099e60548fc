use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use crate::client::{ApiRequest, ApiResponse};
use super::types::UploadDescriptor;
use super::errors::Result;

/// Payload handed to a [`BlobSink`], read lazily chunk by chunk
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// JSON API transport - issues one request against the remote service
/// with whatever credentials the implementation carries.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse>;
}

/// Storage backend reachable through a signed destination
#[async_trait]
pub trait BlobSink: Send + Sync {
    /// Stream `body` to `target`. The body must be consumed (or dropped)
    /// before returning.
    async fn put(
        &self,
        target: &UploadDescriptor,
        body: ByteStream,
        content_length: u64,
        content_type: &str,
    ) -> Result<ApiResponse>;
}
