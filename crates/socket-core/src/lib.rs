//! Connection, Worker, presence store and supporting primitives for the
//! bidirectional message plane.

pub mod codec;
pub mod connection;
pub mod error;
pub mod framing;
pub mod idgen;
pub mod presence;
pub mod worker;
