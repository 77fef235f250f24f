//! Topics and Subscriptions
//!
//! Thin handles given to application code. They never touch router state
//! directly: publishing, subscribing and cancelling all enqueue an action.

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use super::action::Action;
use super::RouterHandle;

/// Error converting an event to or from its wire payload
#[derive(Debug)]
pub enum PayloadError {
    Serialize(serde_json::Error),
    Deserialize(serde_json::Error),
}

impl fmt::Display for PayloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadError::Serialize(e) => write!(f, "Failed to serialize event: {}", e),
            PayloadError::Deserialize(e) => write!(f, "Failed to deserialize event: {}", e),
        }
    }
}

impl std::error::Error for PayloadError {}

/// An event type that can travel as a text payload
pub trait Payload: Sized + Send + 'static {
    fn to_payload(&self) -> Result<String, PayloadError>;
    fn from_payload(payload: &str) -> Result<Self, PayloadError>;
}

/// Plain text events are sent verbatim
impl Payload for String {
    fn to_payload(&self) -> Result<String, PayloadError> {
        Ok(self.clone())
    }

    fn from_payload(payload: &str) -> Result<Self, PayloadError> {
        Ok(payload.to_string())
    }
}

/// Wrapper for events carried as JSON text
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Json<T>(pub T);

impl<T> Payload for Json<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    fn to_payload(&self) -> Result<String, PayloadError> {
        serde_json::to_string(&self.0).map_err(PayloadError::Serialize)
    }

    fn from_payload(payload: &str) -> Result<Self, PayloadError> {
        serde_json::from_str(payload)
            .map(Json)
            .map_err(PayloadError::Deserialize)
    }
}

/// Receives the lifecycle and events of one subscription.
///
/// Callbacks run on the router's subscriber dispatcher, never on the drain
/// loop, and are delivered in the order the router produced them.
pub trait Listener<T: Payload>: Send + Sync + 'static {
    /// The topic owner confirmed the subscription
    fn on_open(&self, subscription: &Subscription<T>) {
        let _ = subscription;
    }

    fn on_event(&self, subscription: &Subscription<T>, event: T);

    /// The subscription ended: cancelled, evicted, or its owner went away
    fn on_close(&self, subscription: &Subscription<T>) {
        let _ = subscription;
    }
}

/// Process-unique subscription identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    fn next() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// A named topic carrying events of type `T`
pub struct Topic<T> {
    name: Arc<str>,
    router: RouterHandle,
    _payload: PhantomData<fn(T) -> T>,
}

impl<T: Payload> Topic<T> {
    pub(crate) fn new(name: Arc<str>, router: RouterHandle) -> Self {
        Self {
            name,
            router,
            _payload: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Publish an event to every subscriber of this topic in the cluster.
    ///
    /// Only fails if the event cannot be converted to a payload; delivery
    /// itself is best-effort.
    pub fn publish(&self, event: T) -> Result<(), PayloadError> {
        let payload = event.to_payload()?;
        self.router.mailbox.enqueue(Action::Publish {
            topic: self.name.to_string(),
            payload,
        });
        Ok(())
    }

    /// Subscribe a listener to this topic
    pub fn subscribe(&self, listener: Arc<dyn Listener<T>>) -> Subscription<T> {
        let subscription = Subscription {
            inner: Arc::new(SubscriptionInner {
                id: SubscriptionId::next(),
                topic: self.clone(),
                listener,
            }),
        };
        self.router
            .mailbox
            .enqueue(Action::Subscribe(subscription.local()));
        subscription
    }
}

impl<T> Clone for Topic<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            router: self.router.clone(),
            _payload: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Topic<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Topic").field("name", &self.name).finish()
    }
}

/// Handle to a live subscription
pub struct Subscription<T: Payload> {
    inner: Arc<SubscriptionInner<T>>,
}

struct SubscriptionInner<T: Payload> {
    id: SubscriptionId,
    topic: Topic<T>,
    listener: Arc<dyn Listener<T>>,
}

impl<T: Payload> Subscription<T> {
    pub fn id(&self) -> SubscriptionId {
        self.inner.id
    }

    pub fn topic(&self) -> &Topic<T> {
        &self.inner.topic
    }

    /// Cancel the subscription.
    ///
    /// Takes effect once the router processes it; events already in flight
    /// may still be delivered before `on_close`.
    pub fn cancel(&self) {
        self.inner
            .topic
            .router
            .mailbox
            .enqueue(Action::CancelSubscription(self.local()));
    }

    fn local(&self) -> LocalSubscriber {
        LocalSubscriber {
            id: self.inner.id,
            topic: self.inner.topic.name.clone(),
            sink: self.inner.clone(),
            router: self.inner.topic.router.clone(),
            open: false,
        }
    }
}

impl<T: Payload> Clone for Subscription<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Payload> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.inner.id)
            .field("topic", &self.inner.topic.name)
            .finish()
    }
}

/// Type-erased listener side of a subscription
pub(crate) trait SubscriberSink: Send + Sync {
    fn on_open(self: Arc<Self>);
    fn on_event(self: Arc<Self>, payload: &str);
    fn on_close(self: Arc<Self>);
}

impl<T: Payload> SubscriberSink for SubscriptionInner<T> {
    fn on_open(self: Arc<Self>) {
        let subscription = Subscription {
            inner: self.clone(),
        };
        self.listener.on_open(&subscription);
    }

    fn on_event(self: Arc<Self>, payload: &str) {
        let subscription = Subscription {
            inner: self.clone(),
        };
        match T::from_payload(payload) {
            Ok(event) => self.listener.on_event(&subscription, event),
            Err(e) => warn!(
                "Subscription {} on '{}': dropping event: {}",
                self.id, self.topic.name, e
            ),
        }
    }

    fn on_close(self: Arc<Self>) {
        let subscription = Subscription {
            inner: self.clone(),
        };
        self.listener.on_close(&subscription);
    }
}

/// A subscription as the router tracks it
#[derive(Clone)]
pub(crate) struct LocalSubscriber {
    id: SubscriptionId,
    topic: Arc<str>,
    sink: Arc<dyn SubscriberSink>,
    router: RouterHandle,
    /// Whether `on_open` has been delivered
    pub(crate) open: bool,
}

impl LocalSubscriber {
    pub(crate) fn id(&self) -> SubscriptionId {
        self.id
    }

    pub(crate) fn topic(&self) -> &str {
        &self.topic
    }

    pub(crate) fn on_open(&self) {
        let sink = self.sink.clone();
        self.router.dispatcher.dispatch(move || sink.on_open());
    }

    pub(crate) fn on_event(&self, payload: &str) {
        let sink = self.sink.clone();
        let payload = payload.to_string();
        self.router
            .dispatcher
            .dispatch(move || sink.on_event(&payload));
    }

    pub(crate) fn on_close(&self) {
        let sink = self.sink.clone();
        self.router.dispatcher.dispatch(move || sink.on_close());
    }

    /// Enqueue a cancel for this subscription on its router
    pub(crate) fn cancel(&self) {
        self.router
            .mailbox
            .enqueue(Action::CancelSubscription(self.clone()));
    }
}

impl fmt::Debug for LocalSubscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LocalSubscription[{} {}]", self.id, self.topic)
    }
}
