//! Server network layer handling UDP communications and game loop coordination

use crate::client_manager::ClientManager;
use crate::simulation::ServerSimulation;
use log::{debug, error, info, warn};
use shared::protocol::{MAX_PACKET_SIZE, PROTOCOL_VERSION};
use shared::{ClientId, Outbound, Packet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval, MissedTickBehavior};

/// Longest step the simulation is allowed to take after a stall
const MAX_TICK_DT: f32 = 1.0 / 20.0;

/// Messages sent from network tasks to main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { packet: Packet, addr: SocketAddr },
    ClientTimeout { client_id: ClientId },
    #[allow(dead_code)]
    Shutdown,
}

/// Messages sent from game loop to network tasks
#[derive(Debug)]
pub enum GameMessage {
    SendPacket {
        packet: Packet,
        addr: SocketAddr,
    },
    BroadcastPacket {
        packet: Packet,
        exclude: Option<ClientId>,
    },
}

/// Main server coordinating networking and the authoritative simulation
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    simulation: ServerSimulation,
    tick_duration: Duration,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: mpsc::UnboundedReceiver<GameMessage>,
}

impl Server {
    pub async fn new(
        addr: &str,
        tick_duration: Duration,
        max_clients: usize,
        simulation: ServerSimulation,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            clients: Arc::new(RwLock::new(ClientManager::new(max_clients))),
            simulation,
            tick_duration,
            server_tx,
            server_rx,
            game_tx,
            game_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn simulation(&self) -> &ServerSimulation {
        &self.simulation
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = vec![0u8; MAX_PACKET_SIZE];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => match Packet::decode(&buffer[..len]) {
                        Ok(packet) => {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        }
                        Err(e) => warn!("Dropping packet from {}: {}", addr, e),
                    },
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes outgoing packet queue
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let clients = Arc::clone(&self.clients);
        let mut game_rx = std::mem::replace(&mut self.game_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = game_rx.recv().await {
                match message {
                    GameMessage::SendPacket { packet, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    GameMessage::BroadcastPacket { packet, exclude } => {
                        let client_addrs = {
                            let clients_guard = clients.read().await;
                            clients_guard.get_client_addrs()
                        };

                        for (client_id, addr) in client_addrs {
                            if Some(client_id) == exclude {
                                continue;
                            }
                            if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                                error!("Failed to send to client {}: {}", client_id, e);
                            }
                        }
                    }
                }
            }
        });
    }

    /// Spawns task that monitors client timeouts
    fn spawn_timeout_checker(&self) {
        let clients = Arc::clone(&self.clients);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut clients_guard = clients.write().await;
                    clients_guard.check_timeouts()
                };

                for client_id in timed_out {
                    if let Err(e) = server_tx.send(ServerMessage::ClientTimeout { client_id }) {
                        error!("Failed to send timeout message: {}", e);
                        break;
                    }
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let data = packet.encode()?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn queue_send(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self.game_tx.send(GameMessage::SendPacket { packet, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    /// Hands everything the simulation produced to the sender task
    async fn flush_outbox(&mut self) {
        let outgoing: Vec<Outbound> = self.simulation.outbox_mut().drain().collect();
        if outgoing.is_empty() {
            return;
        }

        let clients = self.clients.read().await;
        for outbound in outgoing {
            let message = match outbound {
                Outbound::ToClient { client, packet } => match clients.addr_of(client) {
                    Some(addr) => GameMessage::SendPacket { packet, addr },
                    None => continue,
                },
                Outbound::Broadcast { packet, exclude } => {
                    GameMessage::BroadcastPacket { packet, exclude }
                }
                Outbound::ToServer(packet) => {
                    warn!("Server tried to send {:?} to itself", packet);
                    continue;
                }
            };
            if let Err(e) = self.game_tx.send(message) {
                error!("Failed to queue outgoing packet: {}", e);
                break;
            }
        }
    }

    /// Processes incoming packets. Connection control is handled at once;
    /// everything else waits in the request queue for the next tick.
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::Connect { client_version } => {
                info!(
                    "Client connecting from {} (version: {})",
                    addr, client_version
                );

                if client_version != PROTOCOL_VERSION {
                    self.queue_send(
                        Packet::Disconnected {
                            reason: format!(
                                "Protocol mismatch: server {}, client {}",
                                PROTOCOL_VERSION, client_version
                            ),
                        },
                        addr,
                    );
                    return;
                }

                // Remove existing connection if present
                let existing_client_id = {
                    let clients = self.clients.read().await;
                    clients.find_client_by_addr(addr)
                };
                if let Some(existing_id) = existing_client_id {
                    info!("Removing existing client {} from {}", existing_id, addr);
                    self.clients.write().await.remove_client(&existing_id);
                    self.simulation.disconnect_player(existing_id);
                }

                let client_id = self.clients.write().await.add_client(addr);
                match client_id {
                    Some(client_id) => {
                        self.simulation.connect_player(client_id);
                    }
                    None => self.queue_send(
                        Packet::Disconnected {
                            reason: "Server full".to_string(),
                        },
                        addr,
                    ),
                }
            }

            Packet::Disconnect => {
                let client_id = {
                    let clients = self.clients.read().await;
                    clients.find_client_by_addr(addr)
                };
                if let Some(client_id) = client_id {
                    self.clients.write().await.remove_client(&client_id);
                    self.simulation.disconnect_player(client_id);
                }
            }

            packet => {
                let mut clients = self.clients.write().await;
                let Some(client_id) = clients.find_client_by_addr(addr) else {
                    debug!("Packet from unconnected address {}", addr);
                    return;
                };
                if !clients.queue_request(client_id, packet) {
                    warn!("Unexpected packet type from client {}", client_id);
                }
            }
        }
        self.flush_outbox().await;
    }

    /// Applies queued requests in arrival order, then advances the simulation
    async fn run_tick(&mut self, dt: f32) {
        let requests = self.clients.write().await.drain_requests();
        for (client_id, packet) in requests {
            self.simulation.handle_request(client_id, packet);
        }

        self.simulation.tick(dt);
        self.flush_outbox().await;
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();

        let mut tick_interval = interval(self.tick_duration);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_tick = Instant::now();

        info!("Server started successfully");

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr).await;
                        },
                        Some(ServerMessage::ClientTimeout { client_id }) => {
                            info!("Client {} timed out", client_id);
                            self.simulation.disconnect_player(client_id);
                            self.flush_outbox().await;
                        },
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                _ = tick_interval.tick() => {
                    let now = Instant::now();
                    let mut dt = now.duration_since(last_tick).as_secs_f32();
                    last_tick = now;
                    if dt > MAX_TICK_DT {
                        warn!("Large delta time detected ({:.3}s), capping to {:.3}s", dt, MAX_TICK_DT);
                        dt = MAX_TICK_DT;
                    }

                    self.run_tick(dt).await;

                    let tick = self.simulation.tick_count();
                    if tick % 600 == 0 {
                        debug!(
                            "Tick {}: {} players, {} entities, {} sectors",
                            tick,
                            self.simulation.player_count(),
                            self.simulation.world().spawned_count(),
                            self.simulation.generator().generated_count()
                        );
                    }
                },
            }
        }

        Ok(())
    }
}
