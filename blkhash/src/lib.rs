mod error;

pub mod cancel;
pub mod digest;
pub mod engine;
pub mod extent;
pub mod source;
pub mod stream;
pub mod worker;

/// Generated gRPC client/server stubs for the extent-map image-server
/// contract (spec.md §6.3). Spawning and supervising the helper process
/// that implements this service is out of scope here; this crate only
/// consumes it.
pub mod imgserver {
    tonic::include_proto!("blkhash.v1");
}

pub use engine::{Config, Engine};
pub use error::{Error, Result};
