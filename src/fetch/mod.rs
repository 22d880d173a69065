//! Building blocks of a single fetch: headers, classification, warm-up and
//! the transports that carry requests.

pub mod classifier;
pub mod headers;
pub mod transport;
pub mod types;
pub mod warmup;

pub use classifier::ResponseClassifier;
pub use headers::{
    BrowserFamily, HeaderError, HeaderProfile, HeaderProfileConfig, HeaderSet, OsFamily,
    origin_root,
};
#[cfg(feature = "browser")]
pub use transport::BrowserTransport;
pub use transport::{
    HttpTransport, Transport, TransportError, TransportRequest, TransportResponse,
};
pub use types::{AttemptOutcome, Classification, FetchRequest};
pub use warmup::{NoWarmup, OriginWarmup, SessionWarmup, WarmupContext};
