//! Library crate for jam-setlist: the optimistic-update and real-time reconciliation
//! engine behind a collaborative setlist-voting client.

/// Application configuration loaded from files and the environment.
pub mod config;
/// Remote API access, persistence and domain models.
pub mod dao;
/// Wire payloads: requests, channel events and Pusher frames.
pub mod dto;
/// Service-level error type.
pub mod error;
/// Sessions, catalog, realtime bridge and optimistic execution.
pub mod services;
/// Versioned jam state and its pure transitions.
pub mod state;
