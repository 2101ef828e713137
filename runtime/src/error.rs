use crate::Generation;
use crate::ObjectId;
use crate::Slot;
use thiserror::Error;

/// Errors when attaching to or talking with a foreign runtime.
///
/// See the source code for the meaning of the variants.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Runtime generation {0} is no longer current")]
    StaleRuntime(Generation),

    #[error("Runtime generation {0} has been torn down")]
    DetachedRuntime(Generation),

    #[error("Handle to object {0} has already been released")]
    Released(ObjectId),

    #[error("Object {0} does not exist in the runtime")]
    InvalidObject(ObjectId),

    #[error("Reference count of object {0} dropped below zero")]
    RefCountUnderflow(ObjectId),

    #[error("No handle is stored at slot {0}")]
    NoSuchSlot(Slot),

    #[error("Every slot is taken")]
    SlotsExhausted,

    #[error("Native runtime failure")]
    Native(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Whether the error means the runtime context itself is unusable, not just one object.
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            Error::StaleRuntime(_) | Error::DetachedRuntime(_) | Error::Released(_)
        )
    }
}
