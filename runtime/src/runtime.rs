use crate::Error;
use crate::Generation;
use crate::ObjectId;

/// A foreign runtime owning the objects that [NativeHandle](crate::NativeHandle)s point to.
///
/// Implementations must be thread-safe: handles are created and dropped on arbitrary threads, and
/// the reference counting must not lose or duplicate updates.
pub trait Runtime: Send + Sync {
    /// Checks if this runtime is still the session identified by `generation`.
    fn check_generation(&self, generation: Generation) -> bool;

    /// Increments the reference count of an object.
    ///
    /// Fails with [Error::StaleRuntime] without touching any count if `generation` is not current,
    /// checked atomically with the update. Fails with [Error::InvalidObject] if `object` does not
    /// exist.
    fn increment_ref(&self, generation: Generation, object: ObjectId) -> Result<(), Error>;

    /// Decrements the reference count of an object.
    ///
    /// Same generation check as [increment_ref](Runtime::increment_ref). The runtime may reclaim
    /// the object once its count reaches zero. Must not corrupt any state when called while the
    /// runtime is shutting down.
    fn decrement_ref(&self, generation: Generation, object: ObjectId) -> Result<(), Error>;

    /// Renders an object as text.
    fn repr(&self, object: ObjectId) -> Result<String, Error>;
}
