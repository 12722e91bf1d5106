//! pulse-throttle — binary throttle state driven by resource snapshots.
//!
//! The gate watches the sampler's snapshot stream and flips between
//! `Clear` and `Throttled` with asymmetric enter/exit conditions so that
//! a noisy CPU reading cannot make it flap.
//!
//! # Transitions
//!
//! ```text
//! Clear → Throttled (either resource):
//!     adaptive:     avg(last K) > max  and  current > max + burst
//!     non-adaptive: current > max
//!     cooldown_until = now + cooldown
//!
//! Throttled → Clear:
//!     now >= cooldown_until
//!     and the last N snapshots are all below 0.9 × max (cpu and memory)
//! ```
//!
//! Waiters parked in `wait_until_clear()` are all woken on release.

pub mod gate;

pub use gate::{ThrottleGate, ThrottleLimits, ThrottleState, ThrottleStatus, Transition};
