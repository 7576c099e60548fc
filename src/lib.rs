pub mod client;
pub mod config;
pub mod core;
pub mod transport;
pub mod upload;
pub mod user;
pub mod utils;

pub use client::{ApiRequest, ApiResponse, Client, RequestBuilder};
pub use config::ClientConfig;
pub use crate::core::{ErrorKind, Result, UploadError};
pub use upload::{Item, ItemOptions, Stream, ThumbStatus};
pub use user::User;
