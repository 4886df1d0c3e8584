//! Safety module root.
//!
//! Emergency stop interlock consulted once per stabilizer cycle.

pub mod interlock;

pub use interlock::{Interlock, InterlockHandle, InterlockState};
