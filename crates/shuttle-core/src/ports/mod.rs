//! Ports: seams where the core talks to the outside world.
//!
//! Checkpoint persistence has its own port in [`crate::checkpoint`].

pub mod clock;

pub use self::clock::{Clock, FixedClock, SystemClock};
