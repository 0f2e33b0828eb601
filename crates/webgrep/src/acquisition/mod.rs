//! Resource acquisition: the transport collaborator, `data:` URL decoding,
//! and the immutable [`FetchedResource`] every extractor consumes.

pub mod data_url;
pub mod http_client;
pub mod resource;

pub use http_client::{FetchResponse, Fetcher, HttpClient};
pub use resource::{normalize_url, ContentKind, FetchedResource, Ordinal, ResourceHint};
