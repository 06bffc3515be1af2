//! wsbridge daemon library
//!
//! The tunnel engine: a persistent control channel to the relay, an
//! independent bridge session per brokered request, and the reconnect
//! supervisor that ties them together.

pub mod tunnel;
