//! Result accessors and the tagged payload used by heterogeneous batches.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

/// Accessors projecting a `Result` onto its success or failure payload.
pub trait ResultExt<T, E> {
    /// The success payload, if this is a success.
    fn value(&self) -> Option<&T>;

    /// The failure payload, if this is a failure.
    fn error(&self) -> Option<&E>;
}

impl<T, E> ResultExt<T, E> for Result<T, E> {
    fn value(&self) -> Option<&T> {
        self.as_ref().ok()
    }

    fn error(&self) -> Option<&E> {
        self.as_ref().err()
    }
}

/// A dynamically typed value tagged with its concrete type.
///
/// Batch awaits mix tasks of different success and failure types, so each
/// slot carries its discriminant explicitly and is recovered by downcasting.
/// The value is shared, so a task's cached result can be handed out without
/// requiring its types to be `Clone`.
pub struct Payload {
    type_id: TypeId,
    type_name: &'static str,
    value: Arc<dyn Any + Send + Sync>,
}

impl Payload {
    /// Wrap a value.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self::shared(Arc::new(value))
    }

    /// Wrap a value that is already shared.
    pub fn shared<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            value,
        }
    }

    /// The discriminant of the wrapped value.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Readable name of the wrapped type.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Whether the wrapped value is a `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    /// Borrow the wrapped value as a `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        (*self.value).downcast_ref::<T>()
    }

    /// Get the shared value as a `T`, or the payload back untouched.
    pub fn downcast_arc<T: Any + Send + Sync>(self) -> Result<Arc<T>, Self> {
        let Self {
            type_id,
            type_name,
            value,
        } = self;
        value.downcast::<T>().map_err(|value| Self {
            type_id,
            type_name,
            value,
        })
    }

    /// Take the wrapped value as a `T`, cloning it when still shared.
    pub fn downcast<T: Any + Send + Sync + Clone>(self) -> Result<T, Self> {
        self.downcast_arc::<T>().map(Arc::unwrap_or_clone)
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Payload").field(&self.type_name).finish()
    }
}

/// One slot of a batch await: success payload or failure payload.
pub type BatchResult = Result<Payload, Payload>;
