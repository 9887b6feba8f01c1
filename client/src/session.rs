//! One client's view of the game, independent of any socket.
//!
//! The session routes every server packet into the local world and predictor,
//! runs the per-step prediction and contact checks, and collects the requests
//! the transport should send next.

use crate::health::ContactTracker;
use crate::input::InputFrame;
use crate::prediction::Predictor;
use crate::world::{ClientWorld, WorldEvent};
use log::{debug, info, warn};
use shared::{
    AbilityEffect, AbilityKind, CatalogSlot, ClientId, ObjectCatalogs, Outbound, Outbox, Packet,
    SectorCoord, ShipConfig, WorldConfig, CLIENT_VERSION,
};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub struct ClientSession {
    world: ClientWorld,
    predictor: Predictor,
    outbox: Outbox,
    contacts: ContactTracker,
    client_id: Option<ClientId>,
    connected: bool,
    elapsed: f32,
    ping_ms: u64,
    rejected: Vec<AbilityKind>,
}

impl ClientSession {
    pub fn new(config: WorldConfig, ships: Vec<ShipConfig>, catalogs: ObjectCatalogs) -> Self {
        Self {
            world: ClientWorld::new(config, ships, catalogs),
            predictor: Predictor::new(),
            outbox: Outbox::new(),
            contacts: ContactTracker::new(),
            client_id: None,
            connected: false,
            elapsed: 0.0,
            ping_ms: 0,
            rejected: Vec::new(),
        }
    }

    pub fn with_defaults(config: WorldConfig) -> Self {
        Self::new(config, vec![ShipConfig::default()], ObjectCatalogs::builtin())
    }

    pub fn world(&self) -> &ClientWorld {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut ClientWorld {
        &mut self.world
    }

    pub fn predictor(&self) -> &Predictor {
        &self.predictor
    }

    pub fn client_id(&self) -> Option<ClientId> {
        self.client_id
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn elapsed(&self) -> f32 {
        self.elapsed
    }

    pub fn ping_ms(&self) -> u64 {
        self.ping_ms
    }

    /// Activations the server has silently refused since the last call.
    pub fn take_rejected(&mut self) -> Vec<AbilityKind> {
        std::mem::take(&mut self.rejected)
    }

    pub fn connect(&mut self) {
        self.outbox.send_to_server(Packet::Connect {
            client_version: CLIENT_VERSION,
        });
    }

    pub fn disconnect(&mut self) {
        if self.connected {
            self.outbox.send_to_server(Packet::Disconnect);
        }
        self.reset();
    }

    pub fn request_regeneration(&mut self, sector: SectorCoord) {
        self.outbox
            .send_to_server(Packet::RequestRegeneration { sector });
    }

    pub fn select_catalog(&mut self, slot: CatalogSlot) {
        self.outbox.send_to_server(Packet::SelectCatalog { slot });
    }

    fn reset(&mut self) {
        self.connected = false;
        self.client_id = None;
        self.world.clear();
        self.predictor.reset();
        self.contacts.clear();
    }

    pub fn handle_packet(&mut self, packet: Packet) {
        match packet {
            Packet::Connected { client_id } => {
                info!("Connected! Client ID: {}", client_id);
                self.client_id = Some(client_id);
                self.connected = true;
                self.world.set_local_client(Some(client_id));
            }

            Packet::EntitySpawned(info) => {
                self.world.apply_spawn(info);
            }

            Packet::EntityDespawned { id } => {
                let owned = self.world.owned_ship() == Some(id);
                self.world.apply_despawn(id);
                if owned {
                    info!("Lost our ship {}", id);
                    self.predictor.reset();
                    self.contacts.clear();
                }
            }

            Packet::EntityDied { id } => self.world.apply_died(id),

            Packet::ScalarChanged {
                id,
                revision,
                value,
            } => {
                self.world.apply_scalar(id, revision, value);
            }

            Packet::AbilityEffect { id, effect } => {
                if self.world.owned_ship() == Some(id) {
                    let started = match effect {
                        AbilityEffect::DashStarted { .. } => Some(AbilityKind::Dash),
                        AbilityEffect::BlinkedTo { .. } => Some(AbilityKind::Blink),
                        AbilityEffect::Ended { .. } => None,
                    };
                    if let Some(ability) = started {
                        self.predictor.confirm(ability);
                    }
                }
                self.world.apply_effect(id, effect);
            }

            Packet::GameState {
                tick,
                timestamp,
                last_processed_input,
                entities,
            } => {
                if timestamp > 0 {
                    let now = SystemTime::now()
                        .duration_since(UNIX_EPOCH)
                        .unwrap_or(Duration::from_secs(0))
                        .as_millis() as u64;
                    self.ping_ms = now.saturating_sub(timestamp);
                }

                self.world.apply_snapshot(tick, &entities);
                let ack = self
                    .client_id
                    .and_then(|id| last_processed_input.get(&id).copied());
                if let Some(ack) = ack {
                    let rejected = self.predictor.on_ack(&mut self.world, ack);
                    self.rejected.extend(rejected);
                }
            }

            Packet::Disconnected { reason } => {
                warn!("Disconnected: {}", reason);
                self.reset();
            }

            other => {
                warn!("Unexpected packet from server: {:?}", other);
            }
        }
    }

    /// Runs one local step: prediction, extrapolation and contact damage.
    pub fn update(&mut self, input: &InputFrame, dt: f32) {
        if !self.connected {
            return;
        }
        self.elapsed += dt.max(0.0);

        self.predictor
            .step(&mut self.world, input, dt, &mut self.outbox);
        self.world.advance(dt);
        self.check_contacts();

        for event in self.world.drain_events() {
            match event {
                WorldEvent::Died(id) => info!("{} destroyed", id),
                WorldEvent::Corrected { id, error } => {
                    debug!("Server corrected {} by {:.1}", id, error)
                }
            }
        }
    }

    fn check_contacts(&mut self) {
        let Some(ship_id) = self.world.owned_ship() else {
            return;
        };
        let hazards = self.world.hazards();
        let Some(ship) = self.world.get_mut(ship_id) else {
            return;
        };

        let hits = self.contacts.detect(ship.position, ship.radius, &hazards);
        for hazard in hits {
            if let Some(display) = ship.health_display.as_mut() {
                display.predict_damage(hazard.damage);
            }
            debug!("Hit {} for {} damage", hazard.id, hazard.damage);
            self.outbox.send_to_server(Packet::DamageRequest {
                target: ship_id,
                amount: hazard.damage,
            });
        }
    }

    /// Requests waiting for the transport, oldest first.
    pub fn drain_outgoing(&mut self) -> Vec<Packet> {
        self.outbox
            .drain()
            .filter_map(|outbound| match outbound {
                Outbound::ToServer(packet) => Some(packet),
                _ => None,
            })
            .collect()
    }
}
