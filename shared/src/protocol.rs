//! UDP wire format. Every datagram is one bincode-encoded [`Packet`].
//!
//! A world state that would not fit in one datagram is split into chunks
//! with [`world_state_chunks`]; the receiver reassembles them by tick.

use crate::actor::{ActorEvent, ActorState, Pickup};
use crate::input::InputCommand;
use crate::replication::ReplicationUpdate;
use crate::{ActorId, EntityId, ParticipantId};
use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const PROTOCOL_VERSION: u32 = 1;

/// Largest datagram either side will read.
pub const MAX_PACKET_SIZE: usize = 4096;

/// Wire size of one `last_processed_input` entry.
const ACK_ENTRY_LEN: usize = 8;

/// Position of one world-state datagram within its tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkInfo {
    pub index: u16,
    pub count: u16,
}

impl ChunkInfo {
    /// The whole tick in a single datagram.
    pub const WHOLE: ChunkInfo = ChunkInfo { index: 0, count: 1 };

    pub fn is_first(&self) -> bool {
        self.index == 0
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Packet {
    // Client -> server
    Connect {
        client_version: u32,
    },
    Input {
        command: InputCommand,
    },
    PickupClaim {
        target: EntityId,
    },
    Disconnect,

    // Server -> client
    Connected {
        client_id: ParticipantId,
        actor_id: ActorId,
    },
    WorldState {
        tick: u32,
        /// Authority time in seconds.
        server_time: f64,
        chunk: ChunkInfo,
        /// Acks for the owners of the actors in this chunk.
        last_processed_input: HashMap<ParticipantId, u32>,
        actors: Vec<ActorState>,
        /// Only the first chunk of a tick carries pickups.
        pickups: Vec<Pickup>,
    },
    ActorEvent {
        actor: ActorId,
        event: ActorEvent,
    },
    CounterChanged {
        actor: ActorId,
        update: ReplicationUpdate<u32>,
    },
    CounterOwner {
        seq: u64,
        value: u32,
    },
    PickupEffect {
        entity: EntityId,
        position: Vec3,
    },
    Disconnected {
        reason: String,
    },
}

impl Packet {
    pub fn encode(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }

    /// Exact size of [`Packet::encode`]'s output.
    pub fn encoded_len(&self) -> Result<usize, bincode::Error> {
        Ok(bincode::serialized_size(self)? as usize)
    }
}

/// Splits one tick of world state into datagrams no larger than
/// [`MAX_PACKET_SIZE`].
///
/// Actors keep their order. Each chunk acks only the owners of its own
/// actors and pickups ride in the first chunk. A single actor never
/// exceeds the budget on its own, so every chunk holds at least one.
pub fn world_state_chunks(
    tick: u32,
    server_time: f64,
    last_processed_input: &HashMap<ParticipantId, u32>,
    actors: Vec<ActorState>,
    pickups: Vec<Pickup>,
) -> Result<Vec<Packet>, bincode::Error> {
    let header = |pickups: Vec<Pickup>| Packet::WorldState {
        tick,
        server_time,
        chunk: ChunkInfo::WHOLE,
        last_processed_input: HashMap::new(),
        actors: Vec::new(),
        pickups,
    };
    let first_header_len = header(pickups.clone()).encoded_len()?;
    let header_len = header(Vec::new()).encoded_len()?;

    let mut groups: Vec<Vec<ActorState>> = vec![Vec::new()];
    let mut used = first_header_len;
    for actor in actors {
        let mut len = bincode::serialized_size(&actor)? as usize;
        if last_processed_input.contains_key(&actor.owner) {
            len += ACK_ENTRY_LEN;
        }

        let current_is_empty = groups.last().map_or(true, Vec::is_empty);
        if !current_is_empty && used + len > MAX_PACKET_SIZE {
            groups.push(Vec::new());
            used = header_len;
        }
        used += len;
        if let Some(group) = groups.last_mut() {
            group.push(actor);
        }
    }

    let count = u16::try_from(groups.len()).unwrap_or(u16::MAX);
    let mut pickups = Some(pickups);
    Ok(groups
        .into_iter()
        .enumerate()
        .map(|(index, actors)| {
            let acks = actors
                .iter()
                .filter_map(|actor| {
                    last_processed_input
                        .get(&actor.owner)
                        .map(|seq| (actor.owner, *seq))
                })
                .collect();
            Packet::WorldState {
                tick,
                server_time,
                chunk: ChunkInfo {
                    index: u16::try_from(index).unwrap_or(u16::MAX),
                    count,
                },
                last_processed_input: acks,
                actors,
                pickups: pickups.take().unwrap_or_default(),
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::movement::MotorState;
    use crate::replication::ReplicatedValue;
    use glam::{Quat, Vec2};

    #[test]
    fn test_packet_serialization_connect() {
        let packet = Packet::Connect {
            client_version: PROTOCOL_VERSION,
        };
        let serialized = packet.encode().unwrap();
        let deserialized = Packet::decode(&serialized).unwrap();

        match deserialized {
            Packet::Connect { client_version } => assert_eq!(client_version, PROTOCOL_VERSION),
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_packet_serialization_input() {
        let command = InputCommand {
            move_input: Vec2::new(0.5, -1.0),
            jump_requested: true,
            camera_yaw: 1.25,
            ..InputCommand::idle(3, 123, 456789)
        };

        let serialized = Packet::Input { command }.encode().unwrap();
        match Packet::decode(&serialized).unwrap() {
            Packet::Input { command: decoded } => {
                assert_eq!(decoded.sequence, 123);
                assert_eq!(decoded.timestamp, 456789);
                assert_eq!(decoded.move_input, Vec2::new(0.5, -1.0));
                assert!(decoded.jump_requested);
                assert!(!decoded.dive_requested);
            }
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_packet_serialization_world_state() {
        let actor = ActorState {
            id: 4,
            owner: 2,
            position: Vec3::new(1.0, 2.0, 3.0),
            rotation: Quat::from_rotation_y(0.5),
            velocity: Vec3::new(0.0, -1.0, 0.0),
            grounded: false,
            motor: MotorState {
                clock: 12.5,
                diving: true,
                ..MotorState::default()
            },
            coins: ReplicatedValue { seq: 3, value: 3 },
        };
        let mut last_processed_input = HashMap::new();
        last_processed_input.insert(2, 99);

        let packet = Packet::WorldState {
            tick: 42,
            server_time: 0.84,
            chunk: ChunkInfo::WHOLE,
            last_processed_input,
            actors: vec![actor.clone()],
            pickups: vec![Pickup {
                id: 7,
                position: Vec3::new(0.0, 1.0, 3.0),
            }],
        };

        let serialized = packet.encode().unwrap();
        assert!(serialized.len() < MAX_PACKET_SIZE);

        match Packet::decode(&serialized).unwrap() {
            Packet::WorldState {
                tick,
                server_time,
                chunk,
                last_processed_input,
                actors,
                pickups,
            } => {
                assert_eq!(tick, 42);
                assert_eq!(chunk, ChunkInfo::WHOLE);
                assert_eq!(server_time, 0.84);
                assert_eq!(last_processed_input.get(&2), Some(&99));
                assert_eq!(actors, vec![actor]);
                assert_eq!(pickups.len(), 1);
                assert_eq!(pickups[0].id, 7);
            }
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    fn crowd(count: u32) -> (Vec<ActorState>, HashMap<ParticipantId, u32>) {
        let actors: Vec<ActorState> = (1..=count)
            .map(|id| ActorState {
                id,
                owner: id,
                position: Vec3::new(id as f32, 1.0, 0.0),
                rotation: Quat::IDENTITY,
                velocity: Vec3::ZERO,
                grounded: true,
                motor: MotorState::default(),
                coins: ReplicatedValue::default(),
            })
            .collect();
        let acks = (1..=count).map(|id| (id, id * 10)).collect();
        (actors, acks)
    }

    #[test]
    fn test_small_world_state_is_one_chunk() {
        let (actors, acks) = crowd(4);
        let packets = world_state_chunks(3, 0.06, &acks, actors, Vec::new()).unwrap();

        assert_eq!(packets.len(), 1);
        match &packets[0] {
            Packet::WorldState { chunk, actors, .. } => {
                assert_eq!(*chunk, ChunkInfo::WHOLE);
                assert_eq!(actors.len(), 4);
            }
            _ => panic!("Expected a world state"),
        }
    }

    #[test]
    fn test_large_world_state_is_chunked_within_budget() {
        let (actors, acks) = crowd(200);
        let pickups = vec![Pickup {
            id: 1,
            position: Vec3::ZERO,
        }];
        let packets = world_state_chunks(9, 0.18, &acks, actors, pickups).unwrap();
        assert!(packets.len() > 1);

        let mut seen = Vec::new();
        for (i, packet) in packets.iter().enumerate() {
            let bytes = packet.encode().unwrap();
            assert!(bytes.len() <= MAX_PACKET_SIZE, "chunk {} is {} bytes", i, bytes.len());
            assert_eq!(packet.encoded_len().unwrap(), bytes.len());

            match packet {
                Packet::WorldState {
                    tick,
                    chunk,
                    last_processed_input,
                    actors,
                    pickups,
                    ..
                } => {
                    assert_eq!(*tick, 9);
                    assert_eq!(chunk.index as usize, i);
                    assert_eq!(chunk.count as usize, packets.len());
                    assert_eq!(pickups.len(), if chunk.is_first() { 1 } else { 0 });
                    assert_eq!(last_processed_input.len(), actors.len());
                    for actor in actors {
                        assert_eq!(last_processed_input.get(&actor.owner), Some(&(actor.id * 10)));
                        seen.push(actor.id);
                    }
                }
                _ => panic!("Expected a world state"),
            }
        }

        assert_eq!(seen, (1..=200).collect::<Vec<_>>());
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(Packet::decode(&[0xff, 0xff, 0xff, 0xff, 0x01]).is_err());
    }
}
