//! Network seam for the offline layer.
//!
//! `Request`/`Response` are owned snapshots of an HTTP exchange, the shape the
//! cache tiers store and the strategies hand back to the page. Anything that
//! can answer a `Request` implements [`Transport`]; production uses
//! [`HttpTransport`] on top of reqwest.

pub mod connectivity;
pub mod transport;
pub mod types;

pub use reqwest::Method;

pub use connectivity::{Connectivity, ConnectivityFlag};
pub use transport::{HttpTransport, Transport};
pub use types::{Destination, Request, Response, ResponseType};
