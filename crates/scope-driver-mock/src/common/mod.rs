//! Shared simulator infrastructure.

pub mod rng;
pub mod timing;

pub use rng::MockRng;
pub use timing::TimingConfig;
