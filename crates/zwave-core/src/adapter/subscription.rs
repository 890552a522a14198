//! Typed subscriptions to inbound commands

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::api::{Command, CommandKind, DecodeCommand};

type Handler = Arc<dyn Fn(&Command) + Send + Sync>;

/// Returned by `subscribe`, used to remove the subscription again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

struct Subscription {
    id: u64,
    kind: CommandKind,
    handler: Handler,
}

/// Registry of handlers keyed by command kind
#[derive(Default)]
pub struct Subscriptions {
    next_id: AtomicU64,
    entries: RwLock<Vec<Subscription>>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call `handler` for every inbound `T`
    pub fn subscribe<T, F>(&self, handler: F) -> SubscriptionHandle
    where
        T: DecodeCommand,
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.subscribe_filtered(handler, |_: &T| true)
    }

    /// Call `handler` for every inbound `T` accepted by `predicate`
    pub fn subscribe_filtered<T, F, P>(&self, handler: F, predicate: P) -> SubscriptionHandle
    where
        T: DecodeCommand,
        F: Fn(&T) + Send + Sync + 'static,
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handler: Handler = Arc::new(move |command: &Command| {
            if let Some(command) = T::from_command(command) {
                if predicate(command) {
                    handler(command);
                }
            }
        });

        tracing::debug!("Adding subscription {} for {:?}", id, T::KIND);
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Subscription {
                id,
                kind: T::KIND,
                handler,
            });
        SubscriptionHandle(id)
    }

    /// Remove a subscription; returns false if it was already gone
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = entries.len();
        entries.retain(|s| s.id != handle.0);
        before != entries.len()
    }

    /// Hand `command` to every subscription of its kind
    ///
    /// Handlers run outside the registry lock, so they may subscribe or
    /// unsubscribe. Returns the number of matching subscriptions.
    pub fn dispatch(&self, command: &Command) -> usize {
        let kind = command.kind();
        let handlers: Vec<Handler> = self
            .entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|s| s.kind == kind)
            .map(|s| s.handler.clone())
            .collect();

        for handler in &handlers {
            handler(command);
        }
        handlers.len()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{NetworkIds, SucNodeId};
    use std::sync::Mutex;

    #[test]
    fn test_dispatch_by_kind() {
        let subscriptions = Subscriptions::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        subscriptions.subscribe(move |cmd: &SucNodeId| sink.lock().unwrap().push(cmd.node_id));

        let matched = subscriptions.dispatch(&Command::SucNodeId(SucNodeId { node_id: 4 }));
        assert_eq!(matched, 1);
        let matched = subscriptions.dispatch(&Command::NetworkIds(NetworkIds {
            home_id: 1,
            node_id: 1,
        }));
        assert_eq!(matched, 0);
        assert_eq!(*seen.lock().unwrap(), vec![4]);
    }

    #[test]
    fn test_predicate_filters() {
        let subscriptions = Subscriptions::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        subscriptions.subscribe_filtered(
            move |cmd: &SucNodeId| sink.lock().unwrap().push(cmd.node_id),
            |cmd: &SucNodeId| cmd.node_id > 1,
        );

        for node_id in 0..4 {
            subscriptions.dispatch(&Command::SucNodeId(SucNodeId { node_id }));
        }
        assert_eq!(*seen.lock().unwrap(), vec![2, 3]);
    }

    #[test]
    fn test_unsubscribe() {
        let subscriptions = Subscriptions::new();
        let handle = subscriptions.subscribe(|_: &SucNodeId| {});
        assert_eq!(subscriptions.len(), 1);
        assert!(subscriptions.unsubscribe(handle));
        assert!(!subscriptions.unsubscribe(handle));
        assert!(subscriptions.is_empty());
        assert_eq!(
            subscriptions.dispatch(&Command::SucNodeId(SucNodeId { node_id: 1 })),
            0
        );
    }
}
