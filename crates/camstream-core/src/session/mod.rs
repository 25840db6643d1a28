//! Stream sessions
//!
//! A [`StreamController`] runs one session at a time. Each session owns a
//! stream thread that connects through a [`Connector`], frames the body, and
//! feeds the shared decode pool; listener callbacks are delivered on a single
//! callback thread.

mod cancellation;
mod connector;
mod controller;
mod listener;
mod shared;
mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use connector::{ByteStream, Connection, Connector, HttpConnector, StreamRequest};
pub use controller::StreamController;
pub use listener::StreamListener;
pub use shared::{SessionState, SessionStats};
