//! Echo protocol implementation.
//!
//! Raw TCP byte echo with no framing:
//! - Every chunk the client sends is written back unchanged, in order.
//! - When the client half-closes, the server finishes echoing, closes its
//!   own write half and the connection loop ends.
//!
//! ## Connection lifecycle
//!
//! ```text
//! Open -> (Echoing -> Open)* -> HalfClosedLocal -> Terminated
//! Open | Echoing -> Terminated   (on I/O error)
//! ```
//!
//! At most one read and one write are in flight per connection, so chunks
//! are never interleaved in the reply.

pub mod handler;

pub use handler::{run_echo, EchoStats};
