//! Outbound HTTP: URL and header building, the shared client, and upstream
//! error sanitizing.
pub mod http_transport;
pub mod request;
pub mod sanitize;

pub use http_transport::HttpTransport;
pub use request::{header_map_from_pairs, join_endpoint, merge_headers};
pub use sanitize::{sanitize_upstream_error, strip_html};
