//! GPU facade layer
//!
//! Provides the trait and shared types the renderer core uses to reach the GPU,
//! plus a dummy device that records everything instead of talking to hardware.

pub mod dummy;
pub mod traits;
pub mod types;

pub use dummy::DummyDevice;
pub use traits::*;
pub use types::*;
