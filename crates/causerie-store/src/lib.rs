//! # causerie-store
//!
//! Durable relational store for the chat core, backed by SQLite.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for threads,
//! messages, attachments, and presence state.  The store is the single
//! source of truth; the server's in-memory connection registry is a
//! derived cache of "who is reachable right now" and is rebuilt from
//! nothing at process start.

pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod presence;
pub mod threads;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
