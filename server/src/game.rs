//! Authoritative world: actors, pickups and the fixed physics tick.
//!
//! Network code feeds commands and claims in through the `deliver_*`
//! methods and reads results back out of the outbox after each tick. Nothing
//! in here touches sockets or wall-clock time, which keeps the world
//! deterministic and easy to drive from tests.

use crate::authority::{AuthorityValidator, PickupRejection, DEFAULT_MAX_PICKUP_DISTANCE};
use crate::input_queue::{InputQueue, DEFAULT_INPUT_QUEUE_CAPACITY};
use crate::npc::{Npc, WanderBrain, WanderConfig};
use glam::Vec3;
use log::{debug, error, info, warn};
use shared::lifecycle::{ActorLifecycle, LifecycleManager, LifecycleRole, LoggingLifecycle};
use shared::movement::StepOutcome;
use shared::{
    ActorEvent, ActorId, ActorState, EntityId, InputCommand, Level, MotorState, MovementConfig,
    ParticipantId, Pickup, ReplicationChannel, ReplicationUpdate, SetupError, SimpleBody,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Something the network layer has to send after a tick.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    BroadcastCounterChange {
        actor: ActorId,
        update: ReplicationUpdate<u32>,
    },
    UnicastCounterChange {
        participant: ParticipantId,
        seq: u64,
        value: u32,
    },
    BroadcastPickupEffect {
        entity: EntityId,
        position: Vec3,
    },
    BroadcastPose {
        actor: ActorId,
        state: ActorState,
        /// Authority time in seconds.
        timestamp: f64,
    },
    /// Goes to every participant except `owner`, who predicted it.
    BroadcastActorEvent {
        actor: ActorId,
        owner: ParticipantId,
        event: ActorEvent,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldConfig {
    pub movement: MovementConfig,
    pub max_pickup_distance: f32,
    pub input_queue_capacity: usize,
    pub npc: WanderConfig,
    /// Seeds the first wanderer; each further one uses the next value.
    pub npc_seed: u64,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            movement: MovementConfig::default(),
            max_pickup_distance: DEFAULT_MAX_PICKUP_DISTANCE,
            input_queue_capacity: DEFAULT_INPUT_QUEUE_CAPACITY,
            npc: WanderConfig::default(),
            npc_seed: 1,
        }
    }
}

#[derive(Debug)]
pub struct ServerActor {
    pub id: ActorId,
    pub owner: ParticipantId,
    pub body: SimpleBody,
    pub motor: MotorState,
    pub coins: ReplicationChannel<u32>,
    pub inputs: InputQueue,
    pub last_outcome: Option<StepOutcome>,
    validator: AuthorityValidator,
}

impl ServerActor {
    pub fn state(&self) -> ActorState {
        ActorState {
            id: self.id,
            owner: self.owner,
            position: self.body.position,
            rotation: self.body.rotation,
            velocity: self.body.velocity,
            grounded: self.body.grounded,
            motor: self.motor,
            coins: self.coins.snapshot(),
        }
    }
}

pub struct World {
    tick: u32,
    time: f64,
    config: WorldConfig,
    level: Arc<Level>,
    actors: BTreeMap<ActorId, ServerActor>,
    npcs: BTreeMap<ActorId, Npc>,
    participants: HashMap<ParticipantId, ActorId>,
    pickups: BTreeMap<EntityId, Pickup>,
    pending_claims: Vec<(ParticipantId, EntityId)>,
    outbox: Vec<Outbound>,
    lifecycle: LifecycleManager,
    hooks: Box<dyn ActorLifecycle + Send>,
    next_actor_id: ActorId,
    next_entity_id: EntityId,
    spawned: u32,
}

impl World {
    pub fn new(level: Level, config: WorldConfig) -> Self {
        let mut world = Self {
            tick: 0,
            time: 0.0,
            config,
            level: Arc::new(level),
            actors: BTreeMap::new(),
            npcs: BTreeMap::new(),
            participants: HashMap::new(),
            pickups: BTreeMap::new(),
            pending_claims: Vec::new(),
            outbox: Vec::new(),
            lifecycle: LifecycleManager::new(),
            hooks: Box::new(LoggingLifecycle),
            next_actor_id: 1,
            next_entity_id: 1,
            spawned: 0,
        };
        world.spawn_pickups();
        world.spawn_npcs();
        world
    }

    pub fn set_lifecycle_hooks(&mut self, hooks: Box<dyn ActorLifecycle + Send>) {
        self.hooks = hooks;
    }

    /// One coin on every pickup point of the level.
    fn spawn_pickups(&mut self) {
        let points = self.level.pickup_points.clone();
        for position in points {
            let id = self.next_entity_id;
            self.next_entity_id += 1;
            self.pickups.insert(id, Pickup { id, position });
        }
        info!("Spawned {} pickups", self.pickups.len());
    }

    /// One wanderer on every NPC point of the level.
    fn spawn_npcs(&mut self) {
        let points = self.level.npc_points.clone();
        for (index, origin) in points.into_iter().enumerate() {
            let seed = self.config.npc_seed.wrapping_add(index as u64);
            if let Err(e) = self.spawn_npc(origin, seed) {
                warn!("Skipping wanderer at ({:.1}, {:.1}): {}", origin.x, origin.z, e);
            }
        }
    }

    /// Adds a server-driven wanderer. It shares the id space with
    /// participant actors.
    pub fn spawn_npc(&mut self, origin: Vec3, seed: u64) -> Result<ActorId, SetupError> {
        let id = self.next_actor_id;
        if let Err(source) = self.config.npc.validate() {
            error!("Cannot spawn wanderer {}: {}", id, source);
            return Err(SetupError::InvalidConfig { actor: id, source });
        }
        self.next_actor_id += 1;

        let npc = Npc {
            id,
            body: SimpleBody::new(origin, self.level.clone()),
            brain: WanderBrain::new(self.config.npc, origin, seed),
        };
        self.npcs.insert(id, npc);

        if let Some(event) = self.lifecycle.start(id, LifecycleRole::Authority) {
            event.dispatch(self.hooks.as_mut());
        }
        info!(
            "Spawned wanderer {} at ({:.1}, {:.1}, {:.1})",
            id, origin.x, origin.y, origin.z
        );
        Ok(id)
    }

    pub fn spawn_actor(&mut self, participant: ParticipantId) -> Result<ActorId, SetupError> {
        self.spawn_actor_with_config(participant, self.config.movement)
    }

    /// Creates the participant's actor. A setup error is fatal to this
    /// actor only; the rest of the world is untouched.
    pub fn spawn_actor_with_config(
        &mut self,
        participant: ParticipantId,
        movement: MovementConfig,
    ) -> Result<ActorId, SetupError> {
        if let Some(&existing) = self.participants.get(&participant) {
            return Err(SetupError::DuplicateActor(existing));
        }

        let id = self.next_actor_id;
        let validator = AuthorityValidator::new(movement, self.config.max_pickup_distance);
        if let Err(source) = validator.validate() {
            error!("Cannot spawn actor {} for participant {}: {}", id, participant, source);
            return Err(SetupError::InvalidConfig { actor: id, source });
        }

        let spawn = self
            .level
            .spawn_point(self.spawned)
            .ok_or(SetupError::NoSpawnPoints)?;

        self.next_actor_id += 1;
        self.spawned += 1;

        let actor = ServerActor {
            id,
            owner: participant,
            body: SimpleBody::new(spawn, self.level.clone()),
            motor: MotorState::default(),
            coins: ReplicationChannel::authority(0),
            inputs: InputQueue::new(participant, self.config.input_queue_capacity),
            last_outcome: None,
            validator,
        };
        self.actors.insert(id, actor);
        self.participants.insert(participant, id);

        if let Some(event) = self.lifecycle.start(id, LifecycleRole::Authority) {
            event.dispatch(self.hooks.as_mut());
        }
        info!(
            "Spawned actor {} for participant {} at ({:.1}, {:.1}, {:.1})",
            id, participant, spawn.x, spawn.y, spawn.z
        );

        Ok(id)
    }

    pub fn remove_actor(&mut self, participant: ParticipantId) -> Option<ActorId> {
        let id = self.participants.remove(&participant)?;
        self.actors.remove(&id);
        self.pending_claims.retain(|(claimer, _)| *claimer != participant);

        if let Some(event) = self.lifecycle.stop(id) {
            event.dispatch(self.hooks.as_mut());
        }
        Some(id)
    }

    /// Queues a command for the participant's actor. The participant id on
    /// the command is overwritten with the sender's.
    pub fn deliver_input_command(
        &mut self,
        participant: ParticipantId,
        command: InputCommand,
    ) -> bool {
        let Some(actor) = self
            .participants
            .get(&participant)
            .and_then(|id| self.actors.get_mut(id))
        else {
            debug!("Input from participant {} without an actor", participant);
            return false;
        };

        actor.inputs.push(InputCommand {
            participant,
            ..command
        })
    }

    /// Queues a pickup claim; claims are resolved at the start of the next tick.
    pub fn deliver_pickup_claim(&mut self, participant: ParticipantId, target: EntityId) {
        self.pending_claims.push((participant, target));
    }

    pub fn tick(&mut self, dt: f32) {
        self.resolve_pickup_claims();

        for actor in self.actors.values_mut() {
            let command = actor.inputs.next_command();
            let (outcome, _) =
                actor
                    .validator
                    .simulate(&mut actor.body, &mut actor.motor, &command, dt);
            actor.last_outcome = Some(outcome);
        }
        for npc in self.npcs.values_mut() {
            npc.tick(self.time, dt);
        }

        self.tick = self.tick.wrapping_add(1);
        self.time += dt as f64;

        for actor in self.actors.values() {
            let Some(outcome) = &actor.last_outcome else {
                continue;
            };
            for event in ActorEvent::from_outcome(outcome) {
                self.outbox.push(Outbound::BroadcastActorEvent {
                    actor: actor.id,
                    owner: actor.owner,
                    event,
                });
            }
        }

        for state in self.actor_states() {
            self.outbox.push(Outbound::BroadcastPose {
                actor: state.id,
                state,
                timestamp: self.time,
            });
        }
    }

    /// Claims are handled in arrival order, so of two claims on one coin
    /// the first valid one wins and the second finds it missing.
    fn resolve_pickup_claims(&mut self) {
        let claims = std::mem::take(&mut self.pending_claims);
        for (participant, target) in claims {
            self.resolve_pickup_claim(participant, target);
        }
    }

    fn resolve_pickup_claim(&mut self, participant: ParticipantId, target: EntityId) {
        let Some(actor) = self
            .participants
            .get(&participant)
            .and_then(|id| self.actors.get_mut(id))
        else {
            return;
        };

        if let Err(reason) = actor
            .validator
            .check_pickup(actor.body.position, self.pickups.get(&target))
        {
            match reason {
                PickupRejection::Missing => {
                    debug!("Pickup {} claimed by {} is gone", target, participant)
                }
                PickupRejection::OutOfRange { distance } => debug!(
                    "Pickup {} out of range for {} ({:.2} > {:.2})",
                    target,
                    participant,
                    distance,
                    actor.validator.max_pickup_distance()
                ),
            }
            return;
        }

        let Some(pickup) = self.pickups.remove(&target) else {
            return;
        };
        let old = *actor.coins.get();
        let update = match actor.coins.set(old.saturating_add(1)) {
            Ok(Some(update)) => update,
            Ok(None) => return,
            Err(e) => {
                error!("Counter write for actor {} failed: {}", actor.id, e);
                return;
            }
        };

        info!(
            "Participant {} collected pickup {} ({} -> {})",
            participant, target, update.old, update.value
        );

        self.outbox.push(Outbound::BroadcastPickupEffect {
            entity: pickup.id,
            position: pickup.position,
        });
        self.outbox.push(Outbound::UnicastCounterChange {
            participant,
            seq: update.seq,
            value: update.value,
        });
        self.outbox.push(Outbound::BroadcastCounterChange {
            actor: actor.id,
            update,
        });
    }

    pub fn drain_outbox(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.outbox)
    }

    pub fn current_tick(&self) -> u32 {
        self.tick
    }

    /// Authority time in seconds.
    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn level(&self) -> &Arc<Level> {
        &self.level
    }

    pub fn actor(&self, id: ActorId) -> Option<&ServerActor> {
        self.actors.get(&id)
    }

    pub fn actor_mut(&mut self, id: ActorId) -> Option<&mut ServerActor> {
        self.actors.get_mut(&id)
    }

    pub fn actor_for(&self, participant: ParticipantId) -> Option<&ServerActor> {
        self.participants
            .get(&participant)
            .and_then(|id| self.actors.get(id))
    }

    pub fn npc(&self, id: ActorId) -> Option<&Npc> {
        self.npcs.get(&id)
    }

    /// Participant actors first, then wanderers.
    pub fn actor_states(&self) -> Vec<ActorState> {
        self.actors
            .values()
            .map(ServerActor::state)
            .chain(self.npcs.values().map(Npc::state))
            .collect()
    }

    pub fn pickups(&self) -> Vec<Pickup> {
        self.pickups.values().copied().collect()
    }

    pub fn last_processed_inputs(&self) -> HashMap<ParticipantId, u32> {
        self.actors
            .values()
            .map(|actor| (actor.owner, actor.inputs.last_processed_sequence()))
            .collect()
    }

    /// Participant actors only.
    pub fn actor_count(&self) -> usize {
        self.actors.len()
    }

    pub fn npc_count(&self) -> usize {
        self.npcs.len()
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new(Level::arena(), WorldConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use glam::Vec2;
    use shared::physics::ACTOR_HALF_EXTENTS;
    use shared::ConfigError;
    use std::sync::Mutex;

    const DT: f32 = 0.02;

    fn level_with_pickup(pickup: Vec3) -> Level {
        Level {
            pickup_points: vec![pickup],
            ..Level::flat()
        }
    }

    fn forward(sequence: u32) -> InputCommand {
        InputCommand {
            move_input: Vec2::new(0.0, 1.0),
            ..InputCommand::idle(1, sequence, sequence as u64 * 20)
        }
    }

    #[test]
    fn test_spawn_and_remove_actor() {
        let mut world = World::default();
        let id = world.spawn_actor(1).unwrap();

        assert_eq!(world.actor_count(), 1);
        assert_eq!(world.actor_for(1).map(|a| a.id), Some(id));
        assert_eq!(world.spawn_actor(1), Err(SetupError::DuplicateActor(id)));

        assert_eq!(world.remove_actor(1), Some(id));
        assert_eq!(world.remove_actor(1), None);
        assert_eq!(world.actor_count(), 0);
    }

    #[test]
    fn test_invalid_config_only_affects_that_actor() {
        let mut world = World::default();
        let good = world.spawn_actor(1).unwrap();

        let bad = MovementConfig {
            dive_cooldown: -1.0,
            ..MovementConfig::default()
        };
        let result = world.spawn_actor_with_config(2, bad);
        assert!(matches!(
            result,
            Err(SetupError::InvalidConfig {
                source: ConfigError::NotPositive { name: "dive_cooldown", .. },
                ..
            })
        ));

        world.deliver_input_command(1, forward(1));
        world.tick(DT);
        assert_eq!(world.actor_count(), 1);
        assert!(world.actor(good).unwrap().body.velocity.z > 0.0);
    }

    #[test]
    fn test_no_spawn_points() {
        let level = Level {
            spawn_points: vec![],
            ..Level::flat()
        };
        let mut world = World::new(level, WorldConfig::default());
        assert_eq!(world.spawn_actor(1), Err(SetupError::NoSpawnPoints));
    }

    #[test]
    fn test_pickups_spawned_from_level() {
        let world = World::default();
        assert_eq!(world.pickups().len(), Level::arena().pickup_points.len());
    }

    #[test]
    fn test_tick_applies_inputs_and_broadcasts_poses() {
        let mut world = World::new(Level::flat(), WorldConfig::default());
        let a = world.spawn_actor(1).unwrap();
        let b = world.spawn_actor(2).unwrap();

        world.deliver_input_command(1, forward(1));
        world.tick(DT);

        assert_eq!(world.current_tick(), 1);
        assert_approx_eq!(world.time(), DT as f64, 1e-9);
        assert_eq!(world.last_processed_inputs().get(&1), Some(&1));
        assert_eq!(world.last_processed_inputs().get(&2), Some(&0));

        let outbox = world.drain_outbox();
        let posed: Vec<ActorId> = outbox
            .iter()
            .filter_map(|o| match o {
                Outbound::BroadcastPose { actor, .. } => Some(*actor),
                _ => None,
            })
            .collect();
        assert_eq!(posed, vec![a, b]);
        assert!(world.drain_outbox().is_empty());
    }

    #[test]
    fn test_held_input_repeats_when_packets_are_late() {
        let mut world = World::new(Level::flat(), WorldConfig::default());
        let id = world.spawn_actor(1).unwrap();

        world.deliver_input_command(1, forward(1));
        world.tick(DT);
        world.tick(DT);

        assert_approx_eq!(world.actor(id).unwrap().body.velocity.z, 2.0, 1e-4);
    }

    #[test]
    fn test_pickup_in_range_increments_once() {
        let spawn = Vec3::new(0.0, ACTOR_HALF_EXTENTS.y, 0.0);
        let mut world = World::new(
            level_with_pickup(spawn + Vec3::new(1.0, 0.0, 0.0)),
            WorldConfig::default(),
        );
        let id = world.spawn_actor(1).unwrap();
        let target = world.pickups()[0].id;

        world.deliver_pickup_claim(1, target);
        world.deliver_pickup_claim(1, target);
        world.tick(DT);

        assert_eq!(*world.actor(id).unwrap().coins.get(), 1);
        assert!(world.pickups().is_empty());

        let outbox = world.drain_outbox();
        assert!(outbox.contains(&Outbound::BroadcastPickupEffect {
            entity: target,
            position: spawn + Vec3::new(1.0, 0.0, 0.0),
        }));
        assert!(outbox.contains(&Outbound::UnicastCounterChange {
            participant: 1,
            seq: 1,
            value: 1,
        }));
        assert!(outbox.contains(&Outbound::BroadcastCounterChange {
            actor: id,
            update: ReplicationUpdate {
                seq: 1,
                old: 0,
                value: 1
            },
        }));
    }

    #[test]
    fn test_pickup_out_of_range_is_ignored() {
        let mut world = World::new(
            level_with_pickup(Vec3::new(5.0, 1.0, 0.0)),
            WorldConfig::default(),
        );
        let id = world.spawn_actor(1).unwrap();
        let target = world.pickups()[0].id;

        world.deliver_pickup_claim(1, target);
        world.tick(DT);

        assert_eq!(*world.actor(id).unwrap().coins.get(), 0);
        assert_eq!(world.pickups().len(), 1);
        assert!(world
            .drain_outbox()
            .iter()
            .all(|o| matches!(o, Outbound::BroadcastPose { .. })));
    }

    #[test]
    fn test_simultaneous_claims_accept_exactly_one() {
        let level = Level {
            spawn_points: vec![
                Vec3::new(0.5, ACTOR_HALF_EXTENTS.y, 0.0),
                Vec3::new(-0.5, ACTOR_HALF_EXTENTS.y, 0.0),
            ],
            ..level_with_pickup(Vec3::new(0.0, 1.0, 0.0))
        };
        let mut world = World::new(level, WorldConfig::default());
        let a = world.spawn_actor(1).unwrap();
        let b = world.spawn_actor(2).unwrap();
        let target = world.pickups()[0].id;

        world.deliver_pickup_claim(2, target);
        world.deliver_pickup_claim(1, target);
        world.tick(DT);

        let total = world.actor(a).unwrap().coins.get() + world.actor(b).unwrap().coins.get();
        assert_eq!(total, 1);
        assert_eq!(*world.actor(b).unwrap().coins.get(), 1);
    }

    #[test]
    fn test_removed_actor_claims_are_dropped() {
        let mut world = World::new(
            level_with_pickup(Vec3::new(0.0, 1.0, 0.0)),
            WorldConfig::default(),
        );
        world.spawn_actor(1).unwrap();
        let target = world.pickups()[0].id;

        world.deliver_pickup_claim(1, target);
        world.remove_actor(1);
        world.tick(DT);

        assert_eq!(world.pickups().len(), 1);
    }

    #[test]
    fn test_lifecycle_hooks_fire() {
        struct Shared(Arc<Mutex<Vec<String>>>);
        impl ActorLifecycle for Shared {
            fn on_authority_start(&mut self, actor: ActorId) {
                self.0.lock().unwrap().push(format!("start {actor}"));
            }
            fn on_stop(&mut self, actor: ActorId, _role: LifecycleRole) {
                self.0.lock().unwrap().push(format!("stop {actor}"));
            }
        }

        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut world = World::default();
        world.set_lifecycle_hooks(Box::new(Shared(calls.clone())));

        let id = world.spawn_actor(7).unwrap();
        world.remove_actor(7);

        assert_eq!(
            *calls.lock().unwrap(),
            vec![format!("start {id}"), format!("stop {id}")]
        );
    }

    #[test]
    fn test_jump_is_broadcast_as_actor_event() {
        let mut world = World::new(Level::flat(), WorldConfig::default());
        let id = world.spawn_actor(1).unwrap();

        world.deliver_input_command(
            1,
            InputCommand {
                jump_requested: true,
                ..forward(1)
            },
        );
        world.tick(DT);

        let outbox = world.drain_outbox();
        assert!(outbox.contains(&Outbound::BroadcastActorEvent {
            actor: id,
            owner: 1,
            event: ActorEvent::Jumped,
        }));
        assert!(world.actor(id).unwrap().last_outcome.unwrap().jumped);

        world.tick(DT);
        assert!(!world
            .drain_outbox()
            .iter()
            .any(|o| matches!(o, Outbound::BroadcastActorEvent { .. })));
    }

    #[test]
    fn test_wanderers_spawn_from_level_and_move() {
        let mut world = World::default();
        let npc_points = Level::arena().npc_points;
        assert_eq!(world.npc_count(), npc_points.len());
        assert_eq!(world.actor_count(), 0);

        let id = world.spawn_actor(1).unwrap();
        assert!(world.npc(id).is_none());

        for _ in 0..50 {
            world.tick(DT);
        }

        let outbox = world.drain_outbox();
        let states = world.actor_states();
        assert_eq!(states.len(), npc_points.len() + 1);
        for (state, origin) in states.iter().filter(|s| s.owner == shared::NO_OWNER).zip(&npc_points) {
            assert_ne!(state.position, *origin);
            assert!((state.position - *origin).length() <= world.config.npc.radius + 0.5);
            assert!(outbox.iter().any(|o| matches!(
                o,
                Outbound::BroadcastPose { actor, .. } if *actor == state.id
            )));
        }
        assert!(!world.last_processed_inputs().contains_key(&shared::NO_OWNER));
    }

    #[test]
    fn test_invalid_wander_config_skips_wanderers() {
        let config = WorldConfig {
            npc: WanderConfig {
                speed: 0.0,
                ..WanderConfig::default()
            },
            ..WorldConfig::default()
        };
        let mut world = World::new(Level::arena(), config);
        assert_eq!(world.npc_count(), 0);
        assert!(world.spawn_actor(1).is_ok());
    }

    #[test]
    fn test_input_participant_is_overwritten() {
        let mut world = World::new(Level::flat(), WorldConfig::default());
        let id = world.spawn_actor(1).unwrap();

        let spoofed = InputCommand {
            participant: 99,
            ..forward(1)
        };
        assert!(world.deliver_input_command(1, spoofed));
        assert!(!world.deliver_input_command(42, forward(1)));

        world.tick(DT);
        assert!(world.actor(id).unwrap().body.velocity.z > 0.0);
    }
}
