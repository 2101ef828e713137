//! Reference-counted handles to objects living in a foreign runtime.
//!
//! An interpreter embedded in this process owns its objects in its own object space. Code outside
//! of it refers to those objects through a [NativeHandle], which pins the object by holding one
//! reference count on it for as long as the handle lives.
//!
//! The foreign runtime is abstracted by the [Runtime] trait. [Heap] is an in-process
//! implementation used by tests and tools.

pub mod config;
pub mod handle;
pub mod heap;
pub mod registry;

mod error;
mod runtime;

pub use config::Config;
pub use error::Error;
pub use handle::Binder;
pub use handle::NativeHandle;
pub use heap::Heap;
pub use registry::Registry;
pub use runtime::Runtime;

use std::fmt::Display;
use std::fmt::Formatter;

/// Opaque identifier of an object inside a foreign runtime.
///
/// Never interpreted on this side, only passed back to the [Runtime].
pub type ObjectId = i64;

/// Opaque index of a [NativeHandle] stored in a [Registry].
pub type Slot = i32;

/// Identifies one session of a foreign runtime.
///
/// A runtime that is restarted or torn down moves to another generation, which invalidates every
/// handle attached to the previous one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Generation(pub u64);

impl Generation {
    /// The generation following this one.
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl Display for Generation {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for Generation {
    fn from(src: u64) -> Self {
        Self(src)
    }
}
