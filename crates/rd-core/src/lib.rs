//! rd-core: client-side session bridge for the RelayDeck dashboard.
//!
//! Reconnecting transports, the chat session and its streaming aggregator,
//! the two shell bridges and upload coordination. Exposed as a library for
//! integration testing; the `relaydeck` binary is a thin front end.

pub mod aggregate;
pub mod app;
pub mod attachment;
pub mod chat;
pub mod config;
pub mod context;
pub mod logging;
pub mod pty;
pub mod renderer;
pub mod runner;
pub mod shell;
pub mod style;
pub mod surface;
pub mod transport;
pub mod upload;
