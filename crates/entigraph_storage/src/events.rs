//! Change notifications: per-entity and per-collection event channels.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use entigraph_foundation::{ComplexValue, EntityId, Value};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Opaque handle returned by `subscribe`, used to unsubscribe.
///
/// A token is only honored by the channel that issued it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionToken {
    channel: u64,
    id: u64,
}

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// An ordered list of subscribers to one kind of event.
pub struct EventChannel<T> {
    id: u64,
    subscribers: Vec<(u64, Callback<T>)>,
}

impl<T> EventChannel<T> {
    /// Creates a channel with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: next_id(),
            subscribers: Vec::new(),
        }
    }

    /// Adds a subscriber. Subscribers are called in subscription order.
    pub fn subscribe<F>(&mut self, callback: F) -> SubscriptionToken
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = next_id();
        self.subscribers.push((id, Arc::new(callback)));
        SubscriptionToken {
            channel: self.id,
            id,
        }
    }

    /// Removes a subscriber. Returns false if the token is unknown here.
    pub fn unsubscribe(&mut self, token: SubscriptionToken) -> bool {
        if token.channel != self.id {
            return false;
        }
        let before = self.subscribers.len();
        self.subscribers.retain(|(id, _)| *id != token.id);
        self.subscribers.len() != before
    }

    /// Copy that keeps this channel's identity and subscribers.
    pub(crate) fn share(&self) -> Self {
        Self {
            id: self.id,
            subscribers: self.subscribers.clone(),
        }
    }

    /// Calls every subscriber with the event.
    pub fn publish(&self, event: &T) {
        for (_, callback) in &self.subscribers {
            callback(event);
        }
    }

    /// Number of subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    /// Returns true if nobody is subscribed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

impl<T> Default for EventChannel<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A clone is a new channel: it has its own identity and no subscribers.
impl<T> Clone for EventChannel<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for EventChannel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventChannel")
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

/// Value of any property: data value, reference, or collection.
#[derive(Clone, Debug, PartialEq)]
pub enum PropertyValue {
    /// A data property value.
    Data(Value),
    /// A to-one navigation target.
    Reference(Option<EntityId>),
    /// A to-many navigation's members.
    Collection(Vec<EntityId>),
}

impl PropertyValue {
    /// Returns the data value, if this is one.
    #[must_use]
    pub fn as_data(&self) -> Option<&Value> {
        match self {
            Self::Data(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the reference target, if this is a reference.
    #[must_use]
    pub fn as_reference(&self) -> Option<Option<EntityId>> {
        match self {
            Self::Reference(r) => Some(*r),
            _ => None,
        }
    }

    /// Returns the collection members, if this is a collection.
    #[must_use]
    pub fn as_collection(&self) -> Option<&[EntityId]> {
        match self {
            Self::Collection(c) => Some(c),
            _ => None,
        }
    }
}

macro_rules! data_conversions {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for PropertyValue {
                fn from(value: $ty) -> Self {
                    Self::Data(value.into())
                }
            }
        )*
    };
}

data_conversions!(Value, bool, i32, i64, f64, &str, String, uuid::Uuid, ComplexValue);

impl From<EntityId> for PropertyValue {
    fn from(id: EntityId) -> Self {
        Self::Reference(Some(id))
    }
}

impl From<Option<EntityId>> for PropertyValue {
    fn from(id: Option<EntityId>) -> Self {
        Self::Reference(id)
    }
}

impl From<Vec<EntityId>> for PropertyValue {
    fn from(ids: Vec<EntityId>) -> Self {
        Self::Collection(ids)
    }
}

/// Raised when any property of an entity changes.
#[derive(Clone, Debug, PartialEq)]
pub struct PropertyChangedEvent {
    /// The entity, or `None` for an instance that has never been in a cache.
    pub entity: Option<EntityId>,
    /// Property name, or dotted path for a field of a complex property.
    pub property_name: String,
    /// Value before the change.
    pub old_value: PropertyValue,
    /// Value after the change.
    pub new_value: PropertyValue,
}

/// Raised when members are added to or removed from a collection.
#[derive(Clone, Debug, PartialEq)]
pub struct ArrayChangedEvent {
    /// The entity owning the collection.
    pub entity: EntityId,
    /// Name of the collection navigation.
    pub navigation: String,
    /// Members added.
    pub added: Vec<EntityId>,
    /// Members removed.
    pub removed: Vec<EntityId>,
}
