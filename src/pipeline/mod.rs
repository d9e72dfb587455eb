//! Pipeline stages for upload → translate → authorize → render.
//!
//! Each submodule implements one step. The [`crate::controller`] sequences
//! them and owns all job state; the stages themselves hold none.
//!
//! ## Data Flow
//!
//! ```text
//! validate ──▶ transfer ──▶ poll ──▶ transfer ──▶ viewer
//! (local)      (upload)     (status)  (token)     (engine)
//! ```
//!
//! 1. [`validate`] — extension and size checks; never touches the network
//! 2. [`transfer`] — the backend round trips behind the [`transfer::Transfer`] trait
//! 3. [`poll`]     — fixed-interval, bounded-budget status polling
//! 4. [`viewer`]   — engine/session traits and the [`viewer::EngineHandle`]
//!    that guarantees disposal
//! 5. [`manifest`] — headless engine that reads the derivative manifest

pub mod manifest;
pub mod poll;
pub mod transfer;
pub mod validate;
pub mod viewer;
