/// Injectable time sources
pub mod clock;

#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

pub use clock::{Clock, ManualClock, TokioClock};
