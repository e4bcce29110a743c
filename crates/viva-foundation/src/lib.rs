pub mod clock;
pub mod env;
pub mod error;
pub mod shutdown;

pub use clock::{real_clock, Clock, RealClock, SharedClock, TestClock};
pub use error::OrchError;
pub use shutdown::{ShutdownGuard, ShutdownHandler};
