//! Cross-cutting services module
//!
//! Identity rotation, request timing and the event hooks the fetch loop
//! reports through.

pub mod events;
pub mod identity;
pub mod timing;

// Re-export commonly used types
pub use events::{
    EventDispatcher, EventHandler, FailureEvent, FetchEvent, IdentityEvent, LoggingHandler,
    PostResponseEvent, PreRequestEvent, RetryEvent, WarmupEvent,
};
pub use identity::{
    DisabledRotator, Identity, IdentityMode, IdentityRotator, ProxyPoolConfig, ProxyPoolRotator,
    RotationStrategy, TorConfig, TorRotator,
};
pub use timing::{BackoffPolicy, PacingWindow};
