//! fal.ai generation client.
//!
//! Provides the transport seam ([`transport::GenerationTransport`]), the
//! fal queue HTTP transport, linear-backoff retry, response normalization,
//! and the typed error taxonomy surfaced to callers.

pub mod client;
pub mod error;
pub mod normalize;
pub mod queue;
pub mod retry;
pub mod transport;

pub use client::{GenerationClient, ProgressCallback, ProgressEvent};
pub use error::{GenerationError, RemedialAction};
pub use queue::{FalQueueConfig, FalQueueTransport};
pub use retry::RetryConfig;
pub use transport::{GenerationTransport, TransportError};
