//! Actor start/stop hooks.
//!
//! Every actor is started exactly once in one role and stopped exactly once.
//! The [`LifecycleManager`] enforces that and hands back the event to run;
//! what an event does is up to the [`ActorLifecycle`] implementation.

use crate::ActorId;
use log::{debug, info, warn};
use std::collections::HashMap;

/// How this process relates to an actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleRole {
    /// The process that owns the authoritative state.
    Authority,
    /// The client whose participant controls the actor.
    Local,
    /// Any other client.
    Observer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Started { actor: ActorId, role: LifecycleRole },
    Stopped { actor: ActorId, role: LifecycleRole },
}

impl LifecycleEvent {
    pub fn dispatch(&self, hooks: &mut dyn ActorLifecycle) {
        match *self {
            LifecycleEvent::Started {
                actor,
                role: LifecycleRole::Authority,
            } => hooks.on_authority_start(actor),
            LifecycleEvent::Started {
                actor,
                role: LifecycleRole::Local,
            } => hooks.on_local_start(actor),
            LifecycleEvent::Started {
                actor,
                role: LifecycleRole::Observer,
            } => hooks.on_observer_start(actor),
            LifecycleEvent::Stopped { actor, role } => hooks.on_stop(actor, role),
        }
    }
}

pub trait ActorLifecycle {
    fn on_authority_start(&mut self, _actor: ActorId) {}
    fn on_local_start(&mut self, _actor: ActorId) {}
    fn on_observer_start(&mut self, _actor: ActorId) {}
    fn on_stop(&mut self, _actor: ActorId, _role: LifecycleRole) {}
}

/// Hooks that only log.
#[derive(Debug, Default)]
pub struct LoggingLifecycle;

impl ActorLifecycle for LoggingLifecycle {
    fn on_authority_start(&mut self, actor: ActorId) {
        info!("Actor {} started on authority", actor);
    }

    fn on_local_start(&mut self, actor: ActorId) {
        info!("Actor {} started as local actor", actor);
    }

    fn on_observer_start(&mut self, actor: ActorId) {
        debug!("Actor {} started as observer", actor);
    }

    fn on_stop(&mut self, actor: ActorId, role: LifecycleRole) {
        info!("Actor {} stopped ({:?})", actor, role);
    }
}

#[derive(Debug, Default)]
pub struct LifecycleManager {
    active: HashMap<ActorId, LifecycleRole>,
}

impl LifecycleManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the actor. `None` if it was already started.
    pub fn start(&mut self, actor: ActorId, role: LifecycleRole) -> Option<LifecycleEvent> {
        if let Some(existing) = self.active.get(&actor) {
            warn!(
                "Actor {} already started as {:?}, ignoring start as {:?}",
                actor, existing, role
            );
            return None;
        }
        self.active.insert(actor, role);
        Some(LifecycleEvent::Started { actor, role })
    }

    /// Unregisters the actor. `None` if it was not running.
    pub fn stop(&mut self, actor: ActorId) -> Option<LifecycleEvent> {
        self.active
            .remove(&actor)
            .map(|role| LifecycleEvent::Stopped { actor, role })
    }

    pub fn role(&self, actor: ActorId) -> Option<LifecycleRole> {
        self.active.get(&actor).copied()
    }

    pub fn is_active(&self, actor: ActorId) -> bool {
        self.active.contains_key(&actor)
    }

    /// Stops everything, lowest id first.
    pub fn stop_all(&mut self) -> Vec<LifecycleEvent> {
        let mut actors: Vec<ActorId> = self.active.keys().copied().collect();
        actors.sort_unstable();
        actors
            .into_iter()
            .filter_map(|actor| self.stop(actor))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
    }

    impl ActorLifecycle for Recorder {
        fn on_authority_start(&mut self, actor: ActorId) {
            self.calls.push(format!("authority {actor}"));
        }

        fn on_local_start(&mut self, actor: ActorId) {
            self.calls.push(format!("local {actor}"));
        }

        fn on_observer_start(&mut self, actor: ActorId) {
            self.calls.push(format!("observer {actor}"));
        }

        fn on_stop(&mut self, actor: ActorId, role: LifecycleRole) {
            self.calls.push(format!("stop {actor} {role:?}"));
        }
    }

    #[test]
    fn test_start_and_stop_once() {
        let mut manager = LifecycleManager::new();
        let mut hooks = Recorder::default();

        let started = manager.start(1, LifecycleRole::Local).unwrap();
        started.dispatch(&mut hooks);
        assert!(manager.start(1, LifecycleRole::Observer).is_none());
        assert_eq!(manager.role(1), Some(LifecycleRole::Local));

        let stopped = manager.stop(1).unwrap();
        stopped.dispatch(&mut hooks);
        assert!(manager.stop(1).is_none());

        assert_eq!(hooks.calls, vec!["local 1", "stop 1 Local"]);
    }

    #[test]
    fn test_dispatch_by_role() {
        let mut manager = LifecycleManager::new();
        let mut hooks = Recorder::default();

        for (actor, role) in [
            (1, LifecycleRole::Authority),
            (2, LifecycleRole::Observer),
        ] {
            manager.start(actor, role).unwrap().dispatch(&mut hooks);
        }

        assert_eq!(hooks.calls, vec!["authority 1", "observer 2"]);
    }

    #[test]
    fn test_stop_all_is_ordered() {
        let mut manager = LifecycleManager::new();
        manager.start(3, LifecycleRole::Observer);
        manager.start(1, LifecycleRole::Authority);

        let events = manager.stop_all();
        assert_eq!(
            events,
            vec![
                LifecycleEvent::Stopped {
                    actor: 1,
                    role: LifecycleRole::Authority
                },
                LifecycleEvent::Stopped {
                    actor: 3,
                    role: LifecycleRole::Observer
                },
            ]
        );
        assert!(manager.is_empty());
    }
}
