//! Client-side game state: local prediction, remote interpolation and the
//! mirrored coin counters.
//!
//! The local actor is simulated immediately with the shared movement
//! controller and corrected whenever the authority disagrees. Remote actors
//! are only ever drawn from buffered snapshots.

use crate::interpolation::{InterpolationConfig, SnapshotInterpolator};
use glam::Vec3;
use log::{debug, info, warn};
use shared::lifecycle::{ActorLifecycle, LifecycleManager, LifecycleRole, LoggingLifecycle};
use shared::{
    ActorEvent, ActorId, ActorState, CameraBasis, ChunkInfo, EntityId, InputCommand, Level,
    MotorState, MovementConfig, MovementSimulator, Packet, ParticipantId, PhysicsBody, Pickup,
    Pose, ReplicationChannel, ReplicationUpdate, SimpleBody, Snapshot,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

pub const DEFAULT_RECONCILE_THRESHOLD: f32 = 0.05;
pub const DEFAULT_CLAIM_RADIUS: f32 = 1.0;
pub const DEFAULT_CLAIM_RETRY: f64 = 0.5;

/// Predictions kept at most; older unacknowledged ones are dropped.
const MAX_PREDICTION_HISTORY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClientConfig {
    pub movement: MovementConfig,
    pub interpolation: InterpolationConfig,
    /// Position error above which the local actor is rewound and replayed.
    pub reconcile_threshold: f32,
    pub claim_radius: f32,
    /// Seconds before a claim on a still-present pickup is sent again.
    pub claim_retry: f64,
    pub physics_dt: f32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            movement: MovementConfig::default(),
            interpolation: InterpolationConfig::default(),
            reconcile_threshold: DEFAULT_RECONCILE_THRESHOLD,
            claim_radius: DEFAULT_CLAIM_RADIUS,
            claim_retry: DEFAULT_CLAIM_RETRY,
            physics_dt: shared::physics_dt(shared::PHYSICS_TICK_RATE),
        }
    }
}

/// Estimate of the authority clock from world-state timestamps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServerClock {
    offset: Option<f64>,
    smoothing: f64,
}

impl ServerClock {
    pub fn new(smoothing: f64) -> Self {
        Self {
            offset: None,
            smoothing: smoothing.clamp(0.0, 1.0),
        }
    }

    pub fn observe(&mut self, server_time: f64, local_now: f64) {
        let sample = server_time - local_now;
        self.offset = Some(match self.offset {
            Some(offset) => offset + (sample - offset) * self.smoothing,
            None => sample,
        });
    }

    pub fn estimate(&self, local_now: f64) -> Option<f64> {
        self.offset.map(|offset| local_now + offset)
    }

    pub fn reset(&mut self) {
        self.offset = None;
    }
}

impl Default for ServerClock {
    fn default() -> Self {
        Self::new(0.1)
    }
}

#[derive(Debug, Clone, Copy)]
struct PredictedInput {
    command: InputCommand,
    position: Vec3,
}

/// Client-side prediction for the actor this participant controls.
#[derive(Debug)]
pub struct LocalPrediction {
    pub actor: ActorId,
    body: SimpleBody,
    motor: MotorState,
    simulator: MovementSimulator,
    history: VecDeque<PredictedInput>,
    threshold: f32,
    dt: f32,
    corrections: u64,
}

impl LocalPrediction {
    pub fn new(
        state: &ActorState,
        level: Arc<Level>,
        simulator: MovementSimulator,
        threshold: f32,
        dt: f32,
    ) -> Self {
        let mut body = SimpleBody::new(state.position, level);
        body.set_state(state.position, state.rotation, state.velocity, state.grounded);

        Self {
            actor: state.id,
            body,
            motor: state.motor,
            simulator,
            history: VecDeque::new(),
            threshold,
            dt,
            corrections: 0,
        }
    }

    /// Runs `command` locally and remembers the result for reconciliation.
    pub fn predict(&mut self, command: &InputCommand) -> Pose {
        let camera = CameraBasis::from_yaw(command.camera_yaw);
        let (_, pose) =
            self.simulator
                .advance(&mut self.body, &mut self.motor, command, &camera, self.dt);

        self.history.push_back(PredictedInput {
            command: *command,
            position: pose.position,
        });
        if self.history.len() > MAX_PREDICTION_HISTORY {
            self.history.pop_front();
        }
        pose
    }

    /// Checks the authoritative state against what was predicted for the
    /// acknowledged input. On a mismatch, rewinds to the authoritative state
    /// and replays every unacknowledged input. Returns true if it corrected.
    pub fn reconcile(&mut self, state: &ActorState, last_processed: u32) -> bool {
        let mut acknowledged = None;
        while let Some(front) = self.history.front() {
            if front.command.sequence > last_processed {
                break;
            }
            acknowledged = self.history.pop_front();
        }

        let Some(acknowledged) = acknowledged.filter(|p| p.command.sequence == last_processed)
        else {
            return false;
        };

        let error = acknowledged.position.distance(state.position);
        if error <= self.threshold {
            return false;
        }

        debug!(
            "Rollback needed for input {}: error {:.3}, replaying {} inputs",
            last_processed,
            error,
            self.history.len()
        );
        self.corrections += 1;

        self.body
            .set_state(state.position, state.rotation, state.velocity, state.grounded);
        self.motor = state.motor;

        for predicted in self.history.iter_mut() {
            let camera = CameraBasis::from_yaw(predicted.command.camera_yaw);
            let (_, pose) = self.simulator.advance(
                &mut self.body,
                &mut self.motor,
                &predicted.command,
                &camera,
                self.dt,
            );
            predicted.position = pose.position;
        }
        true
    }

    pub fn pose(&self) -> Pose {
        self.body.pose()
    }

    pub fn velocity(&self) -> Vec3 {
        self.body.velocity
    }

    pub fn motor(&self) -> &MotorState {
        &self.motor
    }

    pub fn pending_inputs(&self) -> usize {
        self.history.len()
    }

    pub fn corrections(&self) -> u64 {
        self.corrections
    }
}

/// An actor controlled by somebody else.
#[derive(Debug)]
pub struct RemoteActor {
    pub owner: ParticipantId,
    pub interpolator: SnapshotInterpolator,
    pub coins: ReplicationChannel<u32>,
}

/// Which part of one world-state tick has arrived.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldStateHeader {
    pub tick: u32,
    pub server_time: f64,
    pub chunk: ChunkInfo,
}

/// Everything needed to draw one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderFrame {
    pub local: Option<Pose>,
    pub remotes: Vec<(ActorId, Pose)>,
    pub coins: u32,
    pub pickups: Vec<Pickup>,
    pub server_time: Option<f64>,
}

pub struct ClientGameState {
    config: ClientConfig,
    level: Arc<Level>,
    participant: Option<ParticipantId>,
    local_actor: Option<ActorId>,
    prediction: Option<LocalPrediction>,
    local_coins: ReplicationChannel<u32>,
    remotes: BTreeMap<ActorId, RemoteActor>,
    pickups: BTreeMap<EntityId, Pickup>,
    claims: HashMap<EntityId, f64>,
    pickup_effects: Vec<(EntityId, Vec3)>,
    actor_events: Vec<(ActorId, ActorEvent)>,
    clock: ServerClock,
    lifecycle: LifecycleManager,
    hooks: Box<dyn ActorLifecycle + Send>,
    last_tick: Option<u32>,
    /// Chunks of `last_tick` applied so far.
    tick_chunks: Vec<u16>,
    /// Actors present in those chunks.
    tick_actors: Vec<ActorId>,
}

impl ClientGameState {
    pub fn new(config: ClientConfig, level: Level) -> Self {
        Self {
            config,
            level: Arc::new(level),
            participant: None,
            local_actor: None,
            prediction: None,
            local_coins: ReplicationChannel::observer(0),
            remotes: BTreeMap::new(),
            pickups: BTreeMap::new(),
            claims: HashMap::new(),
            pickup_effects: Vec::new(),
            actor_events: Vec::new(),
            clock: ServerClock::default(),
            lifecycle: LifecycleManager::new(),
            hooks: Box::new(LoggingLifecycle),
            last_tick: None,
            tick_chunks: Vec::new(),
            tick_actors: Vec::new(),
        }
    }

    pub fn set_lifecycle_hooks(&mut self, hooks: Box<dyn ActorLifecycle + Send>) {
        self.hooks = hooks;
    }

    /// A repeated `Connected` for the current actor is ignored. A different
    /// actor means a new session, so everything from the old one is dropped
    /// and the coin mirror starts over.
    pub fn on_connected(&mut self, participant: ParticipantId, actor: ActorId) {
        if self.local_actor == Some(actor) {
            debug!("Already controlling actor {}", actor);
            return;
        }
        if self.local_actor.is_some() {
            info!("Server assigned a new actor, dropping previous session");
            self.reset();
        }

        info!("Connected as participant {} controlling actor {}", participant, actor);
        self.local_coins.reset(0);
        self.participant = Some(participant);
        self.local_actor = Some(actor);
    }

    /// Dispatches one packet from the server.
    pub fn apply_packet(&mut self, packet: Packet, local_now: f64) {
        match packet {
            Packet::Connected {
                client_id,
                actor_id,
            } => self.on_connected(client_id, actor_id),
            Packet::WorldState {
                tick,
                server_time,
                chunk,
                last_processed_input,
                actors,
                pickups,
            } => self.apply_world_state_chunk(
                WorldStateHeader {
                    tick,
                    server_time,
                    chunk,
                },
                &last_processed_input,
                actors,
                pickups,
                local_now,
            ),
            Packet::CounterChanged { actor, update } => self.apply_counter_change(actor, &update),
            Packet::CounterOwner { seq, value } => self.apply_counter_owner(seq, value),
            Packet::PickupEffect { entity, position } => self.apply_pickup_effect(entity, position),
            Packet::ActorEvent { actor, event } => self.apply_actor_event(actor, event),
            Packet::Disconnected { reason } => {
                warn!("Disconnected by server: {}", reason);
                self.reset();
            }
            other => warn!("Unexpected packet from server: {:?}", other),
        }
    }

    /// Applies a world state that arrived as a single datagram.
    pub fn apply_world_state(
        &mut self,
        tick: u32,
        server_time: f64,
        last_processed_input: &HashMap<ParticipantId, u32>,
        actors: Vec<ActorState>,
        pickups: Vec<Pickup>,
        local_now: f64,
    ) {
        self.apply_world_state_chunk(
            WorldStateHeader {
                tick,
                server_time,
                chunk: ChunkInfo::WHOLE,
            },
            last_processed_input,
            actors,
            pickups,
            local_now,
        );
    }

    /// Applies one chunk of a tick's world state.
    ///
    /// Chunks of the newest tick are applied as they arrive, in any order.
    /// Pickups come with the first chunk. Remote actors missing from the
    /// tick are only dropped once every chunk of it has been seen.
    pub fn apply_world_state_chunk(
        &mut self,
        header: WorldStateHeader,
        last_processed_input: &HashMap<ParticipantId, u32>,
        actors: Vec<ActorState>,
        pickups: Vec<Pickup>,
        local_now: f64,
    ) {
        let WorldStateHeader {
            tick,
            server_time,
            chunk,
        } = header;

        match self.last_tick {
            Some(last) if tick < last => {
                debug!("Ignoring out-of-order world state {}", tick);
                return;
            }
            Some(last) if tick == last => {
                if self.tick_chunks.contains(&chunk.index) {
                    debug!("Ignoring duplicate chunk {} of world state {}", chunk.index, tick);
                    return;
                }
            }
            _ => {
                self.last_tick = Some(tick);
                self.tick_chunks.clear();
                self.tick_actors.clear();
                self.clock.observe(server_time, local_now);
            }
        }
        self.tick_chunks.push(chunk.index);

        for state in actors {
            self.tick_actors.push(state.id);
            if Some(state.id) == self.local_actor {
                self.apply_local_state(&state, last_processed_input);
            } else {
                self.deliver_pose_snapshot(
                    state.id,
                    Snapshot::new(server_time, state.position, state.rotation),
                );
                if let Some(remote) = self.remotes.get_mut(&state.id) {
                    remote.owner = state.owner;
                    remote.coins.sync(&state.coins);
                }
            }
        }

        if chunk.is_first() {
            self.pickups = pickups.into_iter().map(|p| (p.id, p)).collect();
            let pickups = &self.pickups;
            self.claims.retain(|id, _| pickups.contains_key(id));
        }

        if self.tick_chunks.len() >= usize::from(chunk.count) {
            let seen = &self.tick_actors;
            let gone: Vec<ActorId> = self
                .remotes
                .keys()
                .copied()
                .filter(|id| !seen.contains(id))
                .collect();
            for actor in gone {
                self.remotes.remove(&actor);
                self.stop_actor(actor);
            }
        }
    }

    fn apply_local_state(
        &mut self,
        state: &ActorState,
        last_processed_input: &HashMap<ParticipantId, u32>,
    ) {
        self.local_coins.sync(&state.coins);

        match self.prediction.as_mut() {
            Some(prediction) => {
                let ack = self
                    .participant
                    .and_then(|p| last_processed_input.get(&p).copied())
                    .unwrap_or(0);
                prediction.reconcile(state, ack);
            }
            None => {
                self.prediction = Some(LocalPrediction::new(
                    state,
                    self.level.clone(),
                    MovementSimulator::new(self.config.movement),
                    self.config.reconcile_threshold,
                    self.config.physics_dt,
                ));
                self.start_actor(state.id, LifecycleRole::Local);
            }
        }
    }

    /// Buffers a pose for a remote actor, creating its interpolator on first sight.
    pub fn deliver_pose_snapshot(&mut self, actor: ActorId, snapshot: Snapshot) {
        if Some(actor) == self.local_actor {
            return;
        }

        if !self.remotes.contains_key(&actor) {
            self.remotes.insert(
                actor,
                RemoteActor {
                    owner: 0,
                    interpolator: SnapshotInterpolator::new(self.config.interpolation),
                    coins: ReplicationChannel::observer(0),
                },
            );
            self.start_actor(actor, LifecycleRole::Observer);
        }
        if let Some(remote) = self.remotes.get_mut(&actor) {
            remote.interpolator.push(snapshot);
        }
    }

    pub fn apply_counter_change(&mut self, actor: ActorId, update: &ReplicationUpdate<u32>) {
        if Some(actor) == self.local_actor {
            self.local_coins.apply(update);
        } else if let Some(remote) = self.remotes.get_mut(&actor) {
            remote.coins.apply(update);
        }
    }

    pub fn apply_counter_owner(&mut self, seq: u64, value: u32) {
        self.local_coins.apply_owner(seq, &value);
    }

    pub fn apply_pickup_effect(&mut self, entity: EntityId, position: Vec3) {
        self.pickups.remove(&entity);
        self.claims.remove(&entity);
        self.pickup_effects.push((entity, position));
    }

    /// Records a jump or dive of another actor for presentation.
    pub fn apply_actor_event(&mut self, actor: ActorId, event: ActorEvent) {
        if Some(actor) == self.local_actor {
            return;
        }
        self.actor_events.push((actor, event));
    }

    /// Runs one fixed physics tick for the local actor. Returns the pickups
    /// to claim this tick.
    pub fn physics_tick(&mut self, command: &InputCommand, local_now: f64) -> Vec<EntityId> {
        let Some(prediction) = self.prediction.as_mut() else {
            return Vec::new();
        };
        let pose = prediction.predict(command);

        let mut claims = Vec::new();
        for pickup in self.pickups.values() {
            if pose.position.distance(pickup.position) > self.config.claim_radius {
                continue;
            }
            let due = self
                .claims
                .get(&pickup.id)
                .map_or(true, |sent| local_now - sent >= self.config.claim_retry);
            if due {
                claims.push(pickup.id);
            }
        }
        for id in &claims {
            self.claims.insert(*id, local_now);
        }
        claims
    }

    /// Render tick: local actor from prediction, remotes from their buffers.
    pub fn render(&mut self, local_now: f64, dt: f32) -> RenderFrame {
        let server_time = self.clock.estimate(local_now);

        let mut remotes = Vec::with_capacity(self.remotes.len());
        if let Some(now) = server_time {
            for (id, remote) in self.remotes.iter_mut() {
                if let Some(pose) = remote.interpolator.update(now, dt) {
                    remotes.push((*id, pose));
                }
            }
        }

        RenderFrame {
            local: self.prediction.as_ref().map(LocalPrediction::pose),
            remotes,
            coins: *self.local_coins.get(),
            pickups: self.pickups.values().copied().collect(),
            server_time,
        }
    }

    /// Pickup effects received since the last call.
    pub fn drain_pickup_effects(&mut self) -> Vec<(EntityId, Vec3)> {
        std::mem::take(&mut self.pickup_effects)
    }

    /// Remote jumps and dives received since the last call.
    pub fn drain_actor_events(&mut self) -> Vec<(ActorId, ActorEvent)> {
        std::mem::take(&mut self.actor_events)
    }

    pub fn reset(&mut self) {
        for event in self.lifecycle.stop_all() {
            event.dispatch(self.hooks.as_mut());
        }
        self.participant = None;
        self.local_actor = None;
        self.prediction = None;
        self.remotes.clear();
        self.local_coins.reset(0);
        self.pickups.clear();
        self.claims.clear();
        self.pickup_effects.clear();
        self.actor_events.clear();
        self.clock.reset();
        self.last_tick = None;
        self.tick_chunks.clear();
        self.tick_actors.clear();
    }

    fn start_actor(&mut self, actor: ActorId, role: LifecycleRole) {
        if let Some(event) = self.lifecycle.start(actor, role) {
            event.dispatch(self.hooks.as_mut());
        }
    }

    fn stop_actor(&mut self, actor: ActorId) {
        if let Some(event) = self.lifecycle.stop(actor) {
            event.dispatch(self.hooks.as_mut());
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn participant(&self) -> Option<ParticipantId> {
        self.participant
    }

    pub fn local_actor(&self) -> Option<ActorId> {
        self.local_actor
    }

    pub fn prediction(&self) -> Option<&LocalPrediction> {
        self.prediction.as_ref()
    }

    pub fn local_coins(&self) -> &ReplicationChannel<u32> {
        &self.local_coins
    }

    /// For subscribing to the local counter.
    pub fn local_coins_mut(&mut self) -> &mut ReplicationChannel<u32> {
        &mut self.local_coins
    }

    pub fn remote(&self, actor: ActorId) -> Option<&RemoteActor> {
        self.remotes.get(&actor)
    }

    pub fn remote_mut(&mut self, actor: ActorId) -> Option<&mut RemoteActor> {
        self.remotes.get_mut(&actor)
    }

    pub fn pickups(&self) -> impl Iterator<Item = &Pickup> {
        self.pickups.values()
    }

    pub fn server_time(&self, local_now: f64) -> Option<f64> {
        self.clock.estimate(local_now)
    }
}

impl Default for ClientGameState {
    fn default() -> Self {
        Self::new(ClientConfig::default(), Level::arena())
    }
}
