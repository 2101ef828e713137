//! Handles pinning objects of a foreign runtime.

use crate::config::DetachedPolicy;
use crate::Config;
use crate::Error;
use crate::Generation;
use crate::ObjectId;
use crate::Runtime;
use std::fmt::Debug;
use std::fmt::Display;
use std::fmt::Formatter;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// A [Runtime] paired with the [Config] of the handles attached through it.
///
/// Cloning is cheap and every clone shares the same runtime.
pub struct Binder<R: Runtime + ?Sized> {
    runtime: Arc<R>,
    config: Arc<Config>,
}

impl<R: Runtime + ?Sized> Binder<R> {
    pub fn new(runtime: Arc<R>, config: Config) -> Self {
        Self {
            runtime,
            config: Arc::new(config),
        }
    }

    /// Attaches a [NativeHandle] to an object of the runtime.
    ///
    /// `generation` is the session the caller believes to be current.
    pub fn attach(&self, generation: Generation, object: ObjectId) -> Result<NativeHandle<R>, Error> {
        NativeHandle::attach(self.runtime.clone(), self.config.clone(), generation, object)
    }

    pub fn runtime(&self) -> &Arc<R> {
        &self.runtime
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl<R: Runtime + ?Sized> Clone for Binder<R> {
    fn clone(&self) -> Self {
        Self {
            runtime: self.runtime.clone(),
            config: self.config.clone(),
        }
    }
}

/// Counted reference to an object living in a [Runtime].
///
/// Holds exactly one reference count on the object from a successful construction until it is
/// released, either explicitly by [release](NativeHandle::release) or by being dropped.
pub struct NativeHandle<R: Runtime + ?Sized> {
    runtime: Arc<R>,
    config: Arc<Config>,
    generation: Generation,
    object: ObjectId,
    released: AtomicBool,
}

impl<R: Runtime + ?Sized> NativeHandle<R> {
    /// Attaches a handle using the default [Config].
    pub fn new(runtime: Arc<R>, generation: Generation, object: ObjectId) -> Result<Self, Error> {
        Self::attach(runtime, Default::default(), generation, object)
    }

    fn attach(
        runtime: Arc<R>,
        config: Arc<Config>,
        generation: Generation,
        object: ObjectId,
    ) -> Result<Self, Error> {
        if !runtime.check_generation(generation) {
            return Err(Error::StaleRuntime(generation));
        }
        runtime.increment_ref(generation, object)?;
        log::trace!("Attached to object {} of runtime {}", object, generation);
        Ok(Self {
            runtime,
            config,
            generation,
            object,
            released: false.into(),
        })
    }

    /// Renders the handle as `TypeName[native representation]`.
    ///
    /// What happens when the runtime has been torn down is decided by [DetachedPolicy].
    pub fn repr(&self) -> Result<String, Error> {
        if self.is_released() {
            return Err(Error::Released(self.object));
        }
        let native = if self.runtime.check_generation(self.generation) {
            self.runtime.repr(self.object)?
        } else {
            match self.config.detached.policy {
                DetachedPolicy::Fail => return Err(Error::DetachedRuntime(self.generation)),
                DetachedPolicy::Placeholder => self.config.detached.placeholder.clone(),
            }
        };
        Ok(format!("{}[{}]", self.config.type_name, native))
    }

    /// Gives back the reference count held by this handle.
    ///
    /// Only the first call has any effect, later calls and the eventual drop do nothing. Returns
    /// whether this call was the first one.
    ///
    /// The decrement is skipped if the runtime has moved to another generation, as the object ID
    /// may then name an unrelated object. Failures are logged and never propagated.
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        if !self.runtime.check_generation(self.generation) {
            log::debug!(
                "Runtime {} is gone, not releasing object {}",
                self.generation,
                self.object
            );
            return true;
        }
        match self.runtime.decrement_ref(self.generation, self.object) {
            Ok(()) => log::trace!(
                "Released object {} of runtime {}",
                self.object,
                self.generation
            ),
            Err(Error::StaleRuntime(_)) | Err(Error::DetachedRuntime(_)) => log::debug!(
                "Runtime {} went away while releasing object {}",
                self.generation,
                self.object
            ),
            Err(err) => log::warn!("Failed to release object {}: {}", self.object, err),
        }
        true
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    pub fn object(&self) -> ObjectId {
        self.object
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn runtime(&self) -> &Arc<R> {
        &self.runtime
    }
}

impl<R: Runtime + ?Sized> Drop for NativeHandle<R> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<R: Runtime + ?Sized> Display for NativeHandle<R> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self.repr() {
            Ok(repr) => f.write_str(&repr),
            Err(err) => write!(f, "{}[<{}>]", self.config.type_name, err),
        }
    }
}

impl<R: Runtime + ?Sized> Debug for NativeHandle<R> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        f.debug_struct("NativeHandle")
            .field("generation", &self.generation)
            .field("object", &self.object)
            .field("released", &self.is_released())
            .finish()
    }
}
