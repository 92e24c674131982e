//! Per-actor queue of movement commands waiting for the next physics tick.
//!
//! Commands can arrive out of order or duplicated over UDP. The queue keeps
//! them sorted by `(timestamp, sequence)`, refuses anything at or behind the
//! last processed command, and hands out exactly one command per tick. When
//! nothing is pending the previous command is repeated without its one-shot
//! edges, so a held stick keeps moving the actor through a late packet.

use log::{debug, warn};
use shared::{InputCommand, ParticipantId};

pub const DEFAULT_INPUT_QUEUE_CAPACITY: usize = 32;

#[derive(Debug)]
pub struct InputQueue {
    participant: ParticipantId,
    pending: Vec<InputCommand>,
    capacity: usize,
    last_processed: Option<InputCommand>,
    dropped: u64,
}

impl InputQueue {
    pub fn new(participant: ParticipantId, capacity: usize) -> Self {
        Self {
            participant,
            pending: Vec::new(),
            capacity: capacity.max(1),
            last_processed: None,
            dropped: 0,
        }
    }

    /// Queues a command. Returns false if it was stale or a duplicate.
    pub fn push(&mut self, command: InputCommand) -> bool {
        if let Some(last) = &self.last_processed {
            if command.sequence <= last.sequence || command.timestamp < last.timestamp {
                debug!(
                    "Dropping stale input {} from participant {} (last processed {})",
                    command.sequence, self.participant, last.sequence
                );
                self.dropped += 1;
                return false;
            }
        }
        if self.pending.iter().any(|p| p.sequence == command.sequence) {
            self.dropped += 1;
            return false;
        }

        let key = (command.timestamp, command.sequence);
        let index = self
            .pending
            .partition_point(|p| (p.timestamp, p.sequence) <= key);
        self.pending.insert(index, command);

        if self.pending.len() > self.capacity {
            let evicted = self.pending.remove(0);
            self.dropped += 1;
            warn!(
                "Input queue for participant {} full, dropped input {}",
                self.participant, evicted.sequence
            );
        }
        true
    }

    /// Command for the next tick: the oldest pending one, or a repeat of the
    /// last one with edges cleared.
    pub fn next_command(&mut self) -> InputCommand {
        if self.pending.is_empty() {
            return match &self.last_processed {
                Some(last) => last.without_edges(),
                None => InputCommand::idle(self.participant, 0, 0),
            };
        }

        let command = self.pending.remove(0);
        self.last_processed = Some(command);
        command
    }

    /// Sequence number of the newest command actually consumed.
    pub fn last_processed_sequence(&self) -> u32 {
        self.last_processed.map_or(0, |c| c.sequence)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
