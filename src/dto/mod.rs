/// Jam channel events and their decoding.
pub mod events;
/// Pusher protocol frames.
pub mod pusher;
/// REST request and response bodies.
pub mod requests;
pub mod validation;
