//! Schedcast REST and WebSocket API
//!
//! Exposes the scheduling operations of [`libschedcast::SchedcastService`]
//! over HTTP and streams status changes to connected WebSocket clients.

pub mod error;
pub mod routes;
pub mod server;
pub mod ws;

pub use server::{build_router, serve, AppState};
