use crate::input::InputSource;
use crate::session::ClientSession;
use log::{error, info, warn};
use shared::protocol::MAX_PACKET_SIZE;
use shared::Packet;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::time::{interval, sleep};

pub struct Client {
    socket: UdpSocket,
    server_addr: SocketAddr,
    session: ClientSession,
    input: Box<dyn InputSource>,

    fake_ping_ms: u64,
    tick_duration: Duration,
    started: Instant,
}

impl Client {
    pub async fn new(
        server_addr: &str,
        fake_ping_ms: u64,
        tick_rate: u32,
        session: ClientSession,
        input: Box<dyn InputSource>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let server_addr = server_addr.parse()?;

        Ok(Client {
            socket,
            server_addr,
            session,
            input,
            fake_ping_ms,
            tick_duration: Duration::from_secs_f64(1.0 / tick_rate.max(1) as f64),
            started: Instant::now(),
        })
    }

    pub fn session(&self) -> &ClientSession {
        &self.session
    }

    async fn send_packet(&self, packet: &Packet) -> Result<(), Box<dyn std::error::Error>> {
        if self.fake_ping_ms > 0 {
            sleep(Duration::from_millis(self.fake_ping_ms / 2)).await;
        }

        let data = packet.encode()?;
        self.socket.send_to(&data, self.server_addr).await?;
        Ok(())
    }

    async fn flush(&mut self) {
        for packet in self.session.drain_outgoing() {
            if let Err(e) = self.send_packet(&packet).await {
                error!("Error sending packet: {}", e);
            }
        }
    }

    fn step(&mut self, dt: f32) {
        let elapsed = self.started.elapsed().as_secs_f32();
        let frame = self.input.sample(elapsed);
        self.session.update(&frame, dt);

        for ability in self.session.take_rejected() {
            info!("Server rejected {:?}; state reverted", ability);
        }
    }

    /// Runs until `duration` elapses, or forever when it is `None`.
    pub async fn run(&mut self, duration: Option<Duration>) -> Result<(), Box<dyn std::error::Error>> {
        info!("Connecting to server...");
        self.session.connect();
        self.flush().await;

        let mut tick_interval = interval(self.tick_duration);
        let mut status_interval = interval(Duration::from_secs(5));
        let mut last_tick = Instant::now();
        let deadline = duration.map(|d| Instant::now() + d);

        let mut buffer = [0u8; MAX_PACKET_SIZE];

        loop {
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                break;
            }

            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, addr)) => {
                            if addr != self.server_addr {
                                warn!("Ignoring packet from unknown sender {}", addr);
                                continue;
                            }
                            if self.fake_ping_ms > 0 {
                                sleep(Duration::from_millis(self.fake_ping_ms / 2)).await;
                            }

                            match Packet::decode(&buffer[..len]) {
                                Ok(packet) => self.session.handle_packet(packet),
                                Err(e) => warn!("Dropping malformed packet: {}", e),
                            }
                        },
                        Err(e) => error!("Error receiving packet: {}", e),
                    }
                },

                _ = tick_interval.tick() => {
                    let now = Instant::now();
                    let dt = now.duration_since(last_tick).as_secs_f32();
                    last_tick = now;

                    self.step(dt);
                    self.flush().await;
                },

                _ = status_interval.tick() => {
                    let world = self.session.world();
                    info!(
                        "Client {:?}: {} entities, ping {}ms, {} pending activations",
                        self.session.client_id(),
                        world.spawned_count(),
                        self.session.ping_ms(),
                        self.session.predictor().pending_len(),
                    );
                },
            }
        }

        self.session.disconnect();
        self.flush().await;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::IdleInput;
    use shared::WorldConfig;

    #[tokio::test]
    async fn test_connect_packet_reaches_server() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap().to_string();

        let session = ClientSession::with_defaults(WorldConfig::default());
        let mut client =
            tokio_test::assert_ok!(Client::new(&addr, 0, 60, session, Box::new(IdleInput)).await);
        client.session.connect();
        client.flush().await;

        let mut buffer = [0u8; MAX_PACKET_SIZE];
        let (len, _) = server.recv_from(&mut buffer).await.unwrap();
        assert!(matches!(
            Packet::decode(&buffer[..len]).unwrap(),
            Packet::Connect { .. }
        ));
    }

    #[tokio::test]
    async fn test_bad_server_address_is_an_error() {
        let session = ClientSession::with_defaults(WorldConfig::default());
        assert!(Client::new("not an address", 0, 60, session, Box::new(IdleInput))
            .await
            .is_err());
    }
}
