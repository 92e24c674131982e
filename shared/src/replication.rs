//! Single-writer replicated values.
//!
//! The server holds the authority side of a [`ReplicationChannel`] and is the
//! only place `set` succeeds. Clients hold observer mirrors that apply the
//! sequenced updates the server broadcasts. Sequence numbers make delivery
//! idempotent: duplicates and out-of-order stragglers are ignored, so every
//! subscriber sees each change exactly once, in authority order.

use crate::error::ReplicationError;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which side of the channel this instance is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationRole {
    Authority,
    Observer,
}

/// A single change broadcast by the authority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationUpdate<T> {
    pub seq: u64,
    pub old: T,
    pub value: T,
}

/// The current value together with the sequence number that produced it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplicatedValue<T> {
    pub seq: u64,
    pub value: T,
}

pub type SubscriptionId = u64;

type ChangeCallback<T> = Box<dyn FnMut(&T, &T) + Send>;
type OwnerCallback<T> = Box<dyn FnMut(&T) + Send>;

pub struct ReplicationChannel<T> {
    role: ReplicationRole,
    seq: u64,
    owner_seq: u64,
    value: T,
    next_subscription: SubscriptionId,
    subscribers: Vec<(SubscriptionId, ChangeCallback<T>)>,
    owner_subscribers: Vec<(SubscriptionId, OwnerCallback<T>)>,
}

impl<T: Clone + PartialEq> ReplicationChannel<T> {
    pub fn authority(initial: T) -> Self {
        Self::with_role(ReplicationRole::Authority, initial)
    }

    pub fn observer(initial: T) -> Self {
        Self::with_role(ReplicationRole::Observer, initial)
    }

    fn with_role(role: ReplicationRole, initial: T) -> Self {
        Self {
            role,
            seq: 0,
            owner_seq: 0,
            value: initial,
            next_subscription: 0,
            subscribers: Vec::new(),
            owner_subscribers: Vec::new(),
        }
    }

    pub fn role(&self) -> ReplicationRole {
        self.role
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn snapshot(&self) -> ReplicatedValue<T> {
        ReplicatedValue {
            seq: self.seq,
            value: self.value.clone(),
        }
    }

    /// Writes a new value. Authority only.
    ///
    /// Returns the update to broadcast, or `None` when the value did not
    /// change.
    pub fn set(&mut self, value: T) -> Result<Option<ReplicationUpdate<T>>, ReplicationError> {
        if self.role != ReplicationRole::Authority {
            return Err(ReplicationError::NotAuthority);
        }
        if value == self.value {
            return Ok(None);
        }

        let old = std::mem::replace(&mut self.value, value);
        self.seq += 1;
        self.notify(&old);

        Ok(Some(ReplicationUpdate {
            seq: self.seq,
            old,
            value: self.value.clone(),
        }))
    }

    /// Applies a broadcast change. Returns false if it was stale or a duplicate.
    pub fn apply(&mut self, update: &ReplicationUpdate<T>) -> bool {
        self.advance(update.seq, &update.value)
    }

    /// Catches the mirror up from a full `(seq, value)` pair.
    pub fn sync(&mut self, replicated: &ReplicatedValue<T>) -> bool {
        self.advance(replicated.seq, &replicated.value)
    }

    /// Applies an owner-only notification.
    ///
    /// Owner callbacks fire once per sequence number; the mirror also moves
    /// forward if the notification is newer than what it holds.
    pub fn apply_owner(&mut self, seq: u64, value: &T) -> bool {
        if seq <= self.owner_seq {
            return false;
        }
        self.owner_seq = seq;
        self.advance(seq, value);

        for (_, callback) in self.owner_subscribers.iter_mut() {
            callback(value);
        }
        true
    }

    /// Starts the channel over at sequence zero holding `value`.
    ///
    /// Subscribers stay registered and are not notified. Used when the
    /// authority behind a mirror is replaced by a fresh one.
    pub fn reset(&mut self, value: T) {
        self.seq = 0;
        self.owner_seq = 0;
        self.value = value;
    }

    pub fn subscribe(&mut self, callback: impl FnMut(&T, &T) + Send + 'static) -> SubscriptionId {
        let id = self.allocate_subscription();
        self.subscribers.push((id, Box::new(callback)));
        id
    }

    pub fn subscribe_owner(&mut self, callback: impl FnMut(&T) + Send + 'static) -> SubscriptionId {
        let id = self.allocate_subscription();
        self.owner_subscribers.push((id, Box::new(callback)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len() + self.owner_subscribers.len();
        self.subscribers.retain(|(sub, _)| *sub != id);
        self.owner_subscribers.retain(|(sub, _)| *sub != id);
        before != self.subscribers.len() + self.owner_subscribers.len()
    }

    fn allocate_subscription(&mut self) -> SubscriptionId {
        let id = self.next_subscription;
        self.next_subscription += 1;
        id
    }

    fn advance(&mut self, seq: u64, value: &T) -> bool {
        if seq <= self.seq {
            debug!("Ignoring replicated value seq {} (have {})", seq, self.seq);
            return false;
        }

        self.seq = seq;
        if *value == self.value {
            return true;
        }
        let old = std::mem::replace(&mut self.value, value.clone());
        self.notify(&old);
        true
    }

    fn notify(&mut self, old: &T) {
        for (_, callback) in self.subscribers.iter_mut() {
            callback(old, &self.value);
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for ReplicationChannel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicationChannel")
            .field("role", &self.role)
            .field("seq", &self.seq)
            .field("value", &self.value)
            .field("subscribers", &self.subscribers.len())
            .field("owner_subscribers", &self.owner_subscribers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder() -> (Arc<Mutex<Vec<(u32, u32)>>>, impl FnMut(&u32, &u32) + Send) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |old: &u32, new: &u32| {
            sink.lock().unwrap().push((*old, *new))
        })
    }

    #[test]
    fn test_authority_set_produces_sequenced_updates() {
        let mut channel = ReplicationChannel::authority(0u32);
        let first = channel.set(1).unwrap().unwrap();
        let second = channel.set(2).unwrap().unwrap();

        assert_eq!(first, ReplicationUpdate { seq: 1, old: 0, value: 1 });
        assert_eq!(second, ReplicationUpdate { seq: 2, old: 1, value: 2 });
        assert_eq!(*channel.get(), 2);
    }

    #[test]
    fn test_equal_value_is_coalesced() {
        let mut channel = ReplicationChannel::authority(5u32);
        assert_eq!(channel.set(5).unwrap(), None);
        assert_eq!(channel.seq(), 0);
    }

    #[test]
    fn test_observer_cannot_write() {
        let mut channel = ReplicationChannel::observer(3u32);
        assert_eq!(channel.set(4), Err(ReplicationError::NotAuthority));
        assert_eq!(*channel.get(), 3);
    }

    #[test]
    fn test_authority_subscribers_fire_on_set() {
        let (seen, callback) = recorder();
        let mut channel = ReplicationChannel::authority(0u32);
        channel.subscribe(callback);

        channel.set(1).unwrap();
        channel.set(1).unwrap();
        channel.set(2).unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![(0, 1), (1, 2)]);
    }

    #[test]
    fn test_observer_ignores_duplicates_and_stale_updates() {
        let mut authority = ReplicationChannel::authority(0u32);
        let u1 = authority.set(1).unwrap().unwrap();
        let u2 = authority.set(2).unwrap().unwrap();

        let (seen, callback) = recorder();
        let mut observer = ReplicationChannel::observer(0u32);
        observer.subscribe(callback);

        assert!(observer.apply(&u1));
        assert!(!observer.apply(&u1));
        assert!(observer.apply(&u2));
        assert!(!observer.apply(&u1));

        assert_eq!(*seen.lock().unwrap(), vec![(0, 1), (1, 2)]);
        assert_eq!(observer.snapshot(), authority.snapshot());
    }

    #[test]
    fn test_sync_recovers_lost_update() {
        let mut authority = ReplicationChannel::authority(0u32);
        authority.set(1).unwrap();
        let lost = authority.set(2).unwrap().unwrap();

        let (seen, callback) = recorder();
        let mut observer = ReplicationChannel::observer(0u32);
        observer.subscribe(callback);

        assert!(observer.sync(&authority.snapshot()));
        assert!(!observer.apply(&lost));
        assert_eq!(*seen.lock().unwrap(), vec![(0, 2)]);
    }

    #[test]
    fn test_owner_notification_fires_once() {
        let owner_seen = Arc::new(Mutex::new(Vec::new()));
        let sink = owner_seen.clone();
        let mut observer = ReplicationChannel::observer(0u32);
        observer.subscribe_owner(move |value: &u32| sink.lock().unwrap().push(*value));

        assert!(observer.apply_owner(1, &1));
        assert!(!observer.apply_owner(1, &1));
        assert!(observer.apply_owner(2, &2));

        assert_eq!(*owner_seen.lock().unwrap(), vec![1, 2]);
        assert_eq!(*observer.get(), 2);
    }

    #[test]
    fn test_owner_notification_after_broadcast_keeps_value() {
        let mut authority = ReplicationChannel::authority(0u32);
        let update = authority.set(1).unwrap().unwrap();

        let (seen, callback) = recorder();
        let mut observer = ReplicationChannel::observer(0u32);
        observer.subscribe(callback);

        observer.apply(&update);
        observer.apply_owner(update.seq, &update.value);

        assert_eq!(*seen.lock().unwrap(), vec![(0, 1)]);
    }

    #[test]
    fn test_reset_accepts_a_fresh_authority() {
        let (seen, callback) = recorder();
        let mut observer = ReplicationChannel::observer(0u32);
        observer.subscribe(callback);
        observer.sync(&ReplicatedValue { seq: 5, value: 5 });
        observer.apply_owner(5, &5);

        observer.reset(0);
        assert_eq!(observer.snapshot(), ReplicatedValue { seq: 0, value: 0 });

        let mut fresh = ReplicationChannel::authority(0u32);
        let update = fresh.set(1).unwrap().unwrap();
        assert!(observer.apply(&update));
        assert!(observer.apply_owner(update.seq, &update.value));

        assert_eq!(*observer.get(), 1);
        assert_eq!(*seen.lock().unwrap(), vec![(0, 5), (0, 1)]);
    }

    #[test]
    fn test_unsubscribe() {
        let (seen, callback) = recorder();
        let mut channel = ReplicationChannel::authority(0u32);
        let id = channel.subscribe(callback);

        assert!(channel.unsubscribe(id));
        assert!(!channel.unsubscribe(id));
        channel.set(1).unwrap();
        assert!(seen.lock().unwrap().is_empty());
    }
}
