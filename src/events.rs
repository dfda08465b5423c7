//! Typed publish/subscribe event bus (§4.7), grounded on `original_source`'s
//! `EventBus.h` (RAII subscription tokens, per-type subscriber vectors) and
//! on the teacher's `fxhash`-keyed maps for fast small-key lookup.

use std::any::{Any, TypeId};
use std::sync::atomic::{AtomicU64, Ordering};

use fxhash::FxHashMap;
use parking_lot::Mutex;
use std::sync::Arc;

/// Marker for the fixed set of standard messages the graph itself publishes
/// (§4.7). Consumers may also publish/subscribe to their own types.
pub trait Message: Any + Send + Sync {}
impl<T: Any + Send + Sync> Message for T {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&dyn Any) + Send + Sync>;

struct Subscriber {
    id: SubscriptionId,
    handler: Handler,
}

#[derive(Default)]
struct Channel {
    subscribers: Vec<Subscriber>,
}

/// Process-wide (per-graph) dispatcher. Publishing is synchronous and
/// re-entrant-safe: handlers run against a snapshot of the subscriber list
/// taken at publish time, so a handler may subscribe/unsubscribe without
/// deadlocking (mirrors the original's "no lock held across callback"
/// design).
#[derive(Default)]
pub struct EventBus {
    channels: Mutex<FxHashMap<TypeId, Channel>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        EventBus::default()
    }

    /// Handlers run against a snapshot of the subscriber list taken while
    /// briefly holding the channel lock; the lock is released before any
    /// handler runs, so a handler may safely subscribe, unsubscribe, or
    /// publish another message without deadlocking.
    pub fn publish<M: Message>(&self, message: &M) {
        let type_id = TypeId::of::<M>();
        let snapshot: Vec<Handler> = {
            let channels = self.channels.lock();
            channels
                .get(&type_id)
                .map(|channel| channel.subscribers.iter().map(|s| s.handler.clone()).collect())
                .unwrap_or_default()
        };
        for handler in &snapshot {
            handler(message as &dyn Any);
        }
    }

    /// Subscribe to messages of type `M`. Returns a token; drop the
    /// returned `Subscription` (or call `unsubscribe`) to stop receiving
    /// messages (§4.7 "RAII subscriptions").
    pub fn subscribe<M: Message, F>(self: &Arc<Self>, handler: F) -> Subscription
    where
        F: Fn(&M) + Send + Sync + 'static,
    {
        let type_id = TypeId::of::<M>();
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let boxed: Handler = Arc::new(move |msg: &dyn Any| {
            if let Some(typed) = msg.downcast_ref::<M>() {
                handler(typed);
            }
        });
        self.channels
            .lock()
            .entry(type_id)
            .or_default()
            .subscribers
            .push(Subscriber { id, handler: boxed });
        Subscription {
            bus: self.clone(),
            type_id,
            id,
        }
    }

    fn unsubscribe(&self, type_id: TypeId, id: SubscriptionId) {
        if let Some(channel) = self.channels.lock().get_mut(&type_id) {
            channel.subscribers.retain(|s| s.id != id);
        }
    }

    /// Heuristic capacity hint applied at compile time (§4.5 step 7:
    /// "pre-allocate the event bus, heuristic `node_count * 3`"). Reserves
    /// room in the channel map itself; per-channel subscriber vectors grow
    /// as subscriptions are actually made, since the hint bounds channel
    /// *count* (roughly one per message type in play), not subscribers.
    pub fn reserve(&self, channel_count_hint: usize) {
        self.channels.lock().reserve(channel_count_hint);
    }

    pub fn subscriber_count<M: Message>(&self) -> usize {
        self.channels
            .lock()
            .get(&TypeId::of::<M>())
            .map(|c| c.subscribers.len())
            .unwrap_or(0)
    }
}

/// RAII handle returned by `EventBus::subscribe`; unsubscribes on drop.
pub struct Subscription {
    bus: std::sync::Arc<EventBus>,
    type_id: TypeId,
    id: SubscriptionId,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.type_id, self.id);
    }
}

/// Groups subscriptions so an owner (e.g. a UI panel, a subsystem) can drop
/// all of them at once (§4.7 "ScopedSubscriptions").
#[derive(Default)]
pub struct ScopedSubscriptions {
    subs: Vec<Subscription>,
}

impl ScopedSubscriptions {
    pub fn new() -> Self {
        ScopedSubscriptions::default()
    }

    pub fn add(&mut self, sub: Subscription) {
        self.subs.push(sub);
    }

    pub fn clear(&mut self) {
        self.subs.clear();
    }
}

/// Standard messages published by the graph itself (§4.7).
pub mod messages {
    use crate::node::NodeHandle;

    #[derive(Debug, Clone)]
    pub struct CleanupRequested {
        pub node: Option<NodeHandle>,
    }

    #[derive(Debug, Clone)]
    pub struct CleanupCompleted {
        pub node: Option<NodeHandle>,
    }

    #[derive(Debug, Clone)]
    pub struct RecompileRequested {
        pub node: NodeHandle,
    }

    #[derive(Debug, Clone, Copy)]
    pub struct WindowResized {
        pub width: u32,
        pub height: u32,
    }

    #[derive(Debug, Clone)]
    pub struct ShaderReloaded {
        pub path: String,
    }

    #[derive(Debug, Clone, Copy)]
    pub struct BudgetOverrun {
        pub over_by_ms: f32,
    }

    #[derive(Debug, Clone, Copy)]
    pub struct BudgetAvailable {
        pub headroom_ms: f32,
    }

    #[derive(Debug, Clone, Copy)]
    pub struct FrameStart {
        pub frame_index: u64,
    }

    #[derive(Debug, Clone, Copy)]
    pub struct FrameEnd {
        pub frame_index: u64,
        pub duration_ms: f32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[derive(Debug)]
    struct Ping(u32);

    #[test]
    fn subscriber_receives_published_message() {
        let bus = Arc::new(EventBus::new());
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let _sub = bus.subscribe::<Ping, _>(move |p| {
            count2.fetch_add(p.0 as usize, Ordering::Relaxed);
        });
        bus.publish(&Ping(3));
        bus.publish(&Ping(4));
        assert_eq!(count.load(Ordering::Relaxed), 7);
    }

    #[test]
    fn dropping_subscription_stops_delivery() {
        let bus = Arc::new(EventBus::new());
        assert_eq!(bus.subscriber_count::<Ping>(), 0);
        let sub = bus.subscribe::<Ping, _>(|_| {});
        assert_eq!(bus.subscriber_count::<Ping>(), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count::<Ping>(), 0);
    }

    #[test]
    fn scoped_subscriptions_clear_together() {
        let bus = Arc::new(EventBus::new());
        let mut scope = ScopedSubscriptions::new();
        scope.add(bus.subscribe::<Ping, _>(|_| {}));
        scope.add(bus.subscribe::<Ping, _>(|_| {}));
        assert_eq!(bus.subscriber_count::<Ping>(), 2);
        scope.clear();
        assert_eq!(bus.subscriber_count::<Ping>(), 0);
    }
}
