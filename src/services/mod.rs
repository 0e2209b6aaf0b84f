/// Captain signup and withdrawal flow.
pub mod captain_service;
/// Song catalog and jam directory.
pub mod catalog_service;
/// Push transport trait, channel registry and in-process hub.
pub mod channels;
/// Per-jam session driving local mutations.
pub mod jam_service;
/// User-facing notices.
pub mod notifications;
/// Optimistic mutation executor with versioned rollback.
pub mod optimistic;
/// Pusher-protocol WebSocket client.
#[cfg(feature = "pusher")]
pub mod pusher_client;
/// Jam channel event bridge.
pub mod realtime;
