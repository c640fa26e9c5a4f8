//! Protocol implementations.
//!
//! - `echo`: raw byte echo, no framing
pub mod echo;
