//! Network Module
//!
//! TCP server and client handling.
//!
//! ## Architecture
//! - Single acceptor thread with a non-blocking accept loop
//! - One reader thread and one responder thread per connection
//! - Commands routed through the Engine

mod connection;
mod processor;
mod responder;
mod server;

pub use connection::Connection;
pub use processor::{CommandProcessor, Flow, GetJob, Outbound, ProcessorState};
pub use responder::Responder;
pub use server::{Server, ShutdownSignal};
