//! # Emvox Core
//!
//! Core library for the Emvox voice emotion analysis service: task queue,
//! upstream model clients, risk scoring, and the background worker.
//!
//! ## Overview
//!
//! `emvox-core` carries everything below the HTTP surface:
//!
//! - **Task Store**: PostgreSQL-backed analysis queue with optimistic,
//!   DB-native locking (conditional `UPDATE`s, no broker)
//! - **Model Clients**: speech emotion recognition (required) and speech
//!   transcription (best effort) over HTTP, plus deterministic fixtures
//!   for development without the model services
//! - **Scoring**: duration-weighted voice risk blended with a lexicon
//!   text-negativity signal
//! - **Worker**: fixed-delay polling loop that claims, analyzes, and
//!   persists tasks with bounded retries
//! - **Progress & Realtime**: process-local phase tracking and the
//!   WebSocket snapshot builder
//!
//! ## Example
//!
//! ```
//! use emvox_core::scoring::{risk, text};
//! use emvox_core::types::SegmentRecord;
//!
//! let segments = vec![SegmentRecord {
//!     seq: 0,
//!     start_ms: 0,
//!     end_ms: 8000,
//!     emotion: "sad".to_string(),
//!     confidence: 0.7,
//! }];
//! let negativity = text::score("最近压力很大，总是失眠");
//! let assessment = risk::evaluate(&segments, negativity.text_neg);
//! println!("{} {}", assessment.risk_score, assessment.risk_level);
//! ```

/// Upstream model service clients (SER, ASR) and local fixtures
pub mod clients;

/// Error types, upstream failure classification, stored-message encoding
pub mod error;

/// Process-local per-task progress states
pub mod progress;

/// WebSocket snapshot assembly
pub mod realtime;

/// Voice risk and text negativity scoring
pub mod scoring;

/// Task-facing application service (enqueue, detail, paging, status)
pub mod service;

/// Durable task store port and the PostgreSQL implementation
pub mod store;

/// Human-readable task numbers
pub mod task_no;

/// Core domain types shared across the crate
pub mod types;

/// Background analysis worker
pub mod worker;

#[cfg(test)]
pub(crate) mod test_utils;

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
