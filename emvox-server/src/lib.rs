//! # Emvox Server
//!
//! HTTP and WebSocket surface for the emvox voice emotion analysis
//! pipeline.
//!
//! ## Overview
//!
//! The server wires the [`emvox_core`] pipeline behind an Axum router:
//!
//! - **Task API**: enqueue analysis tasks for uploaded recordings, read
//!   task details and paged segment series under `/api/v1`
//! - **Realtime Watch**: per-task WebSocket at `/ws/tasks` pushing
//!   byte-diffed JSON snapshots until the task reaches a terminal state
//! - **System Surface**: `/ping` and `/health` probes plus an admin-only
//!   queue/worker status endpoint
//! - **Embedded Worker**: the polling analysis worker runs inside the
//!   server process and is spawned from the same configuration
//!
//! Authorization is opaque-bearer throughout: tokens resolve to an
//! identity through the session directory, owners see their own
//! recordings and admins see everything.

pub mod auth;
pub mod errors;
pub mod handlers;
pub mod infra;
pub mod routes;

#[cfg(test)]
mod tests;
