use crate::game::{ClientConfig, ClientGameState};
use crate::input::{timestamp_ms, InputDevice, InputSampler};
use log::{debug, error, info, warn};
use shared::protocol::{MAX_PACKET_SIZE, PROTOCOL_VERSION};
use shared::{Level, Packet};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::time::{interval, sleep};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

const CONNECT_RETRY: Duration = Duration::from_secs(1);

/// Matches the server's client timeout.
pub const SERVER_SILENCE_TIMEOUT: Duration = Duration::from_secs(5);

/// Headless game client: samples input, predicts, talks to the server.
pub struct Client {
    socket: UdpSocket,
    server_addr: SocketAddr,
    connected: bool,
    started: Instant,
    /// Last time any datagram arrived from the server
    last_heard: Instant,

    game_state: ClientGameState,
    sampler: InputSampler,
    device: Box<dyn InputDevice + Send>,
    render_rate: u32,

    fake_ping_ms: u64,
}

impl Client {
    pub async fn new(
        server_addr: &str,
        fake_ping_ms: u64,
        config: ClientConfig,
        render_rate: u32,
        device: Box<dyn InputDevice + Send>,
    ) -> Result<Self, BoxError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let server_addr = server_addr.parse()?;

        let mut game_state = ClientGameState::new(config, Level::arena());
        game_state.local_coins_mut().subscribe_owner(|coins: &u32| {
            info!("Collected a coin, now holding {}", coins);
        });

        Ok(Client {
            socket,
            server_addr,
            connected: false,
            started: Instant::now(),
            last_heard: Instant::now(),
            game_state,
            sampler: InputSampler::new(0),
            device,
            render_rate: render_rate.max(1),
            fake_ping_ms,
        })
    }

    pub fn game_state(&self) -> &ClientGameState {
        &self.game_state
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    fn local_now(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    async fn connect(&mut self) -> Result<(), BoxError> {
        info!("Connecting to server at {}...", self.server_addr);

        let packet = Packet::Connect {
            client_version: PROTOCOL_VERSION,
        };
        self.send_packet(&packet).await
    }

    async fn send_packet(&self, packet: &Packet) -> Result<(), BoxError> {
        if self.fake_ping_ms > 0 {
            sleep(Duration::from_millis(self.fake_ping_ms / 2)).await;
        }

        let data = packet.encode()?;
        self.socket.send_to(&data, self.server_addr).await?;
        Ok(())
    }

    fn handle_packet(&mut self, packet: Packet) {
        let now = self.local_now();
        self.last_heard = Instant::now();
        match &packet {
            Packet::Connected { client_id, .. } => {
                self.connected = true;
                self.sampler.set_participant(*client_id);
            }
            Packet::Disconnected { .. } => {
                self.connected = false;
            }
            _ => {}
        }
        self.game_state.apply_packet(packet, now);
    }

    /// Drops the session if the server has been quiet for longer than
    /// `timeout`. Returns true if it did; the next retry reconnects.
    fn check_server_silence(&mut self, timeout: Duration) -> bool {
        if !self.connected || self.last_heard.elapsed() <= timeout {
            return false;
        }

        warn!(
            "No packets from server for {:.1}s, reconnecting",
            self.last_heard.elapsed().as_secs_f32()
        );
        self.connected = false;
        self.game_state.reset();
        true
    }

    /// Samples a command, predicts it and sends it along with any pickup claims.
    async fn physics_tick(&mut self) -> Result<(), BoxError> {
        if !self.connected || self.game_state.prediction().is_none() {
            return Ok(());
        }

        let command = self.sampler.take_command(timestamp_ms());
        let claims = self.game_state.physics_tick(&command, self.local_now());

        self.send_packet(&Packet::Input { command }).await?;
        for target in claims {
            debug!("Claiming pickup {}", target);
            self.send_packet(&Packet::PickupClaim { target }).await?;
        }
        Ok(())
    }

    fn render_tick(&mut self, dt: f32, frame_count: u64) {
        self.sampler.sample_frame(self.device.as_mut());
        let frame = self.game_state.render(self.local_now(), dt);

        for (entity, position) in self.game_state.drain_pickup_effects() {
            debug!(
                "Pickup {} collected at ({:.1}, {:.1}, {:.1})",
                entity, position.x, position.y, position.z
            );
        }
        for (actor, event) in self.game_state.drain_actor_events() {
            debug!("Actor {} {:?}", actor, event);
        }

        if frame_count % (self.render_rate as u64 * 5) == 0 {
            if let Some(local) = frame.local {
                debug!(
                    "Local actor at ({:.2}, {:.2}, {:.2}), {} remote, {} coins, {} pickups left",
                    local.position.x,
                    local.position.y,
                    local.position.z,
                    frame.remotes.len(),
                    frame.coins,
                    frame.pickups.len()
                );
            }
        }
    }

    /// Runs until `duration` has elapsed (forever if `None`).
    pub async fn run(&mut self, duration: Option<Duration>) -> Result<(), BoxError> {
        self.connect().await?;

        let physics_dt = self.game_state_physics_dt();
        let render_dt = 1.0 / self.render_rate as f32;

        let mut physics_interval = interval(Duration::from_secs_f32(physics_dt));
        let mut render_interval = interval(Duration::from_secs_f32(render_dt));
        let mut connect_interval = interval(CONNECT_RETRY);
        let deadline = duration.map(|d| tokio::time::Instant::now() + d);

        let mut buffer = [0u8; MAX_PACKET_SIZE];
        let mut frame_count: u64 = 0;

        loop {
            if deadline.is_some_and(|deadline| tokio::time::Instant::now() >= deadline) {
                break;
            }

            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, _)) => {
                            if self.fake_ping_ms > 0 {
                                sleep(Duration::from_millis(self.fake_ping_ms / 2)).await;
                            }

                            match Packet::decode(&buffer[..len]) {
                                Ok(packet) => self.handle_packet(packet),
                                Err(e) => warn!("Failed to deserialize packet: {}", e),
                            }
                        },
                        Err(e) => error!("Error receiving packet: {}", e),
                    }
                },

                _ = connect_interval.tick() => {
                    self.check_server_silence(SERVER_SILENCE_TIMEOUT);
                    if !self.connected {
                        self.connect().await?;
                    }
                },

                _ = physics_interval.tick() => {
                    if let Err(e) = self.physics_tick().await {
                        error!("Error sending input: {}", e);
                    }
                },

                _ = render_interval.tick() => {
                    frame_count += 1;
                    self.render_tick(render_dt, frame_count);
                },
            }
        }

        if self.connected {
            let _ = self.send_packet(&Packet::Disconnect).await;
        }

        Ok(())
    }

    fn game_state_physics_dt(&self) -> f32 {
        self.game_state.config().physics_dt
    }
}
