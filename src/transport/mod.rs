mod http;

pub use http::{HttpBlobSink, HttpTransport};
