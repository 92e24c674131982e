//! Server network layer handling UDP communications and game loop coordination

use crate::client_manager::{ClientManager, DEFAULT_CLIENT_TIMEOUT};
use crate::game::{Outbound, World};
use log::{debug, error, info, warn};
use shared::protocol::{world_state_chunks, MAX_PACKET_SIZE, PROTOCOL_VERSION};
use shared::{ActorState, Packet, ParticipantId, Pickup};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::time::interval;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Messages sent from network tasks to main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { packet: Packet, addr: SocketAddr },
    ClientTimeout { client_id: ParticipantId, addr: SocketAddr },
    Shutdown,
}

/// Messages sent from game loop to network tasks
#[derive(Debug)]
pub enum GameMessage {
    SendPacket { packet: Packet, addr: SocketAddr },
    SendToClient { packet: Packet, client_id: ParticipantId },
    BroadcastPacket { packet: Packet, exclude: Option<ParticipantId> },
}

/// Who a packet produced by a tick goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    All,
    AllExcept(ParticipantId),
    Participant(ParticipantId),
}

/// Turns one tick's outbox into packets. Pose updates are batched into
/// world-state packets that also carry acks and the pickup set, split into
/// as many chunks as it takes to stay within [`MAX_PACKET_SIZE`].
pub fn outbound_packets(
    outbox: Vec<Outbound>,
    tick: u32,
    server_time: f64,
    last_processed_input: HashMap<ParticipantId, u32>,
    pickups: Vec<Pickup>,
) -> Vec<(Destination, Packet)> {
    let mut packets = Vec::new();
    let mut actors: Vec<ActorState> = Vec::new();

    for outbound in outbox {
        match outbound {
            Outbound::BroadcastPose { state, .. } => actors.push(state),
            Outbound::BroadcastCounterChange { actor, update } => packets.push((
                Destination::All,
                Packet::CounterChanged { actor, update },
            )),
            Outbound::UnicastCounterChange {
                participant,
                seq,
                value,
            } => packets.push((
                Destination::Participant(participant),
                Packet::CounterOwner { seq, value },
            )),
            Outbound::BroadcastPickupEffect { entity, position } => packets.push((
                Destination::All,
                Packet::PickupEffect { entity, position },
            )),
            Outbound::BroadcastActorEvent {
                actor,
                owner,
                event,
            } => packets.push((
                Destination::AllExcept(owner),
                Packet::ActorEvent { actor, event },
            )),
        }
    }

    if !actors.is_empty() {
        match world_state_chunks(tick, server_time, &last_processed_input, actors, pickups) {
            Ok(chunks) => {
                if chunks.len() > 1 {
                    debug!("World state for tick {} split into {} chunks", tick, chunks.len());
                }
                packets.extend(chunks.into_iter().map(|chunk| (Destination::All, chunk)));
            }
            Err(e) => error!("Failed to build world state for tick {}: {}", tick, e),
        }
    }

    packets
}

/// Main server coordinating networking and game simulation
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    max_clients: usize,
    world: World,
    tick_duration: Duration,

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
    ) -> Result<Self, BoxError> {
        Self::with_world(addr, tick_duration, max_clients, World::default()).await
    }

    pub async fn with_world(
        addr: &str,
        tick_duration: Duration,
        max_clients: usize,
        world: World,
    ) -> Result<Self, BoxError> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            clients: Arc::new(RwLock::new(ClientManager::with_timeout(
                max_clients,
                DEFAULT_CLIENT_TIMEOUT,
            ))),
            max_clients,
            world,
            tick_duration,
            server_tx,
            server_rx,
            game_tx,
            game_rx,
        })
    }

    /// Replaces how long a client may stay silent before it is dropped.
    /// Call before [`Server::run`].
    pub fn with_client_timeout(mut self, timeout: Duration) -> Self {
        self.clients = Arc::new(RwLock::new(ClientManager::with_timeout(
            self.max_clients,
            timeout,
        )));
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, BoxError> {
        Ok(self.socket.local_addr()?)
    }

    /// Sender that can stop the main loop with [`ServerMessage::Shutdown`].
    pub fn control_handle(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; MAX_PACKET_SIZE];

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
                        Err(e) => warn!("Failed to deserialize packet from {}: {}", addr, e),
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
                        if let Err(e) = send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    GameMessage::SendToClient { packet, client_id } => {
                        let addr = clients.read().await.addr_of(client_id);
                        match addr {
                            Some(addr) => {
                                if let Err(e) = send_packet_impl(&socket, &packet, addr).await {
                                    error!("Failed to send to client {}: {}", client_id, e);
                                }
                            }
                            None => debug!("Client {} gone, dropping packet", client_id),
                        }
                    }
                    GameMessage::BroadcastPacket { packet, exclude } => {
                        let client_addrs = clients.read().await.get_client_addrs();

                        for (client_id, addr) in client_addrs {
                            if Some(client_id) == exclude {
                                continue;
                            }

                            if let Err(e) = send_packet_impl(&socket, &packet, addr).await {
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
            let mut interval = interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = clients.write().await.check_timeouts();

                for (client_id, addr) in timed_out {
                    if let Err(e) = server_tx.send(ServerMessage::ClientTimeout { client_id, addr }) {
                        error!("Failed to send timeout message: {}", e);
                        return;
                    }
                }
            }
        });
    }

    fn queue(&self, message: GameMessage) {
        if let Err(e) = self.game_tx.send(message) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        self.queue(GameMessage::SendPacket { packet, addr });
    }

    /// Processes incoming packets and feeds the world
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::Connect { client_version } => {
                info!(
                    "Client connecting from {} (version: {})",
                    addr, client_version
                );

                if client_version != PROTOCOL_VERSION {
                    self.send_packet(
                        Packet::Disconnected {
                            reason: format!(
                                "Protocol version {} not supported (server speaks {})",
                                client_version, PROTOCOL_VERSION
                            ),
                        },
                        addr,
                    );
                    return;
                }

                let existing_client_id = self.clients.read().await.find_client_by_addr(addr);
                if let Some(existing_id) = existing_client_id {
                    info!("Removing existing client {} from {}", existing_id, addr);
                    self.clients.write().await.remove_client(&existing_id);
                    self.world.remove_actor(existing_id);
                }

                let client_id = self.clients.write().await.add_client(addr);
                let Some(client_id) = client_id else {
                    self.send_packet(
                        Packet::Disconnected {
                            reason: "Server full".to_string(),
                        },
                        addr,
                    );
                    return;
                };

                match self.world.spawn_actor(client_id) {
                    Ok(actor_id) => self.send_packet(
                        Packet::Connected {
                            client_id,
                            actor_id,
                        },
                        addr,
                    ),
                    Err(e) => {
                        self.clients.write().await.remove_client(&client_id);
                        self.send_packet(
                            Packet::Disconnected {
                                reason: e.to_string(),
                            },
                            addr,
                        );
                    }
                }
            }

            Packet::Input { command } => {
                let client_id = self.clients.write().await.touch_addr(addr);
                if let Some(client_id) = client_id {
                    self.world.deliver_input_command(client_id, command);
                }
            }

            Packet::PickupClaim { target } => {
                let client_id = self.clients.write().await.touch_addr(addr);
                if let Some(client_id) = client_id {
                    self.world.deliver_pickup_claim(client_id, target);
                }
            }

            Packet::Disconnect => {
                let client_id = self.clients.read().await.find_client_by_addr(addr);
                if let Some(client_id) = client_id {
                    self.clients.write().await.remove_client(&client_id);
                    self.world.remove_actor(client_id);
                }
            }

            _ => {
                warn!("Unexpected packet type from client at {}", addr);
            }
        }
    }

    /// Advances the world one fixed tick and sends what it produced
    fn run_tick(&mut self, dt: f32) {
        self.world.tick(dt);

        let packets = outbound_packets(
            self.world.drain_outbox(),
            self.world.current_tick(),
            self.world.time(),
            self.world.last_processed_inputs(),
            self.world.pickups(),
        );

        for (destination, packet) in packets {
            match destination {
                Destination::All => self.queue(GameMessage::BroadcastPacket {
                    packet,
                    exclude: None,
                }),
                Destination::AllExcept(client_id) => self.queue(GameMessage::BroadcastPacket {
                    packet,
                    exclude: Some(client_id),
                }),
                Destination::Participant(client_id) => {
                    self.queue(GameMessage::SendToClient { packet, client_id })
                }
            }
        }
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), BoxError> {
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();

        let mut tick_interval = interval(self.tick_duration);
        let dt = self.tick_duration.as_secs_f32();

        info!("Server started successfully ({:.0} Hz)", 1.0 / dt);

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr).await;
                        },
                        Some(ServerMessage::ClientTimeout { client_id, addr }) => {
                            info!("Client {} timed out", client_id);
                            self.world.remove_actor(client_id);
                            self.send_packet(
                                Packet::Disconnected {
                                    reason: "Timed out".to_string(),
                                },
                                addr,
                            );
                        },
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                _ = tick_interval.tick() => {
                    self.run_tick(dt);

                    let tick = self.world.current_tick();
                    if tick % 250 == 0 {
                        debug!(
                            "Tick {}: {} actors, {} pickups left",
                            tick,
                            self.world.actor_count(),
                            self.world.pickups().len()
                        );
                    }
                },
            }
        }

        Ok(())
    }
}

async fn send_packet_impl(
    socket: &UdpSocket,
    packet: &Packet,
    addr: SocketAddr,
) -> Result<(), BoxError> {
    let data = packet.encode()?;
    if data.len() > MAX_PACKET_SIZE {
        return Err(format!(
            "packet of {} bytes exceeds the {} byte limit",
            data.len(),
            MAX_PACKET_SIZE
        )
        .into());
    }
    socket.send_to(&data, addr).await?;
    Ok(())
}
