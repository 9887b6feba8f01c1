//! # Simulation Server Library
//!
//! The authoritative half of the space-combat simulation. The server owns the
//! canonical transform, health and ability state of every entity; clients only
//! ever predict and then conform to what is broadcast from here.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Abilities
//! Movement, dash, blink, rotation and shooting requests are re-validated
//! against the server's own cooldown copy. Accepted activations are broadcast
//! to every observer; rejected ones are dropped without a reply and healed by
//! the next snapshot.
//!
//! ### Damage Authority
//! Every damage source funnels into [`ServerSimulation::take_damage`], the only
//! writer of replicated health. Death fires once per entity and hands the entity
//! back to its pool or despawns it for good.
//!
//! ### Pooling And Streaming
//! Bullets and procedural world objects are recycled through a
//! [`shared::ObjectPool`]. The [`generator::SectorGenerator`] fills each sector
//! deterministically from the world seed the first time a player comes near,
//! and periodically brings destroyed content back.
//!
//! ## Architecture Design
//!
//! ### Single Simulation Context
//! [`simulation::ServerSimulation`] holds the arena, pool, generator and timer
//! wheel and is passed around explicitly. It never touches sockets: it pushes
//! packets into an outbox that the [`network`] layer drains.
//!
//! ### UDP Event Loop
//! Network receive and send run as tokio tasks feeding one simulation loop over
//! `mpsc` channels, so all simulation state is mutated from a single task.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::Server;
//! use server::simulation::ServerSimulation;
//! use shared::WorldConfig;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let simulation = ServerSimulation::with_defaults(WorldConfig::default());
//!     let mut server = Server::new(
//!         "127.0.0.1:8080",
//!         Duration::from_millis(16),
//!         32,
//!         simulation,
//!     )
//!     .await?;
//!
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod abilities;
pub mod client_manager;
pub mod generator;
pub mod health;
pub mod network;
pub mod simulation;
pub mod world;

pub use generator::{GeneratorError, SectorGenerator};
pub use simulation::{ServerSimulation, Spawner, TimerKey};
