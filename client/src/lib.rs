//! # Game Client Library
//!
//! Client side of the authoritative space-combat simulation. The client never
//! decides anything: it predicts its own ship for responsiveness and mirrors
//! everything else from server broadcasts.
//!
//! ## Module Organization
//!
//! ### World (`world`)
//! Local entity arena and object pool mirroring every spawn and despawn the
//! server announces, plus reconciliation of snapshots:
//! - Observers take the server's transform as is and smooth rotation
//! - The owner takes it too and predicts on from there, with no replay
//!
//! ### Prediction (`prediction`)
//! Applies movement, rotation, dash, blink and shooting to the owned ship
//! immediately and sends the matching requests. A dash or blink acknowledged
//! without its ability effect was rejected and is reverted. There is no input
//! replay.
//!
//! ### Health (`health`)
//! Shadow health display that shows local hits at once and eases towards the
//! authoritative value, and edge-triggered contact detection.
//!
//! ### Session (`session`)
//! Transport-free glue: routes server packets into the world and predictor and
//! collects outgoing requests. Tests drive it directly.
//!
//! ### Input (`input`) and Network (`network`)
//! Input sources for the headless binary and the UDP loop that connects a
//! session to a server.

pub mod health;
pub mod input;
pub mod network;
pub mod prediction;
pub mod session;
pub mod world;
