//! In-process [Runtime] keeping its objects in a map.

use crate::Error;
use crate::Generation;
use crate::ObjectId;
use crate::Runtime;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::RwLock;

struct Object {
    repr: String,
    refs: usize,
}

/// Object space of a minimal runtime.
///
/// An object is pinned while its reference count is positive and reclaimed as soon as the count
/// drops back to zero. Objects that were never referenced stay until [collect](Heap::collect).
///
/// Object IDs are never reused, not even across a [restart](Heap::restart).
pub struct Heap {
    objects: RwLock<HashMap<ObjectId, Object>>,
    generation: AtomicU64,
    shut_down: AtomicBool,
    counter: AtomicI64,
    total_refs: AtomicUsize,
}

impl Heap {
    /// Stores an object rendered as `repr`.
    pub fn store(&self, repr: impl Into<String>) -> ObjectId {
        let mut objects = self.objects.write().expect("Failed to write-lock the heap");
        let object = self.counter.fetch_add(1, Ordering::Relaxed);
        objects.insert(
            object,
            Object {
                repr: repr.into(),
                refs: 0,
            },
        );
        object
    }

    /// The current generation.
    pub fn generation(&self) -> Generation {
        Generation(self.generation.load(Ordering::Acquire))
    }

    /// Discards every object and starts a new generation.
    pub fn restart(&self) -> Generation {
        let mut objects = self.objects.write().expect("Failed to write-lock the heap");
        objects.clear();
        self.total_refs.store(0, Ordering::Release);
        self.shut_down.store(false, Ordering::Release);
        let generation = Generation(self.generation.fetch_add(1, Ordering::AcqRel)).next();
        log::info!("Heap restarted as generation {}", generation);
        generation
    }

    /// Discards every object, after which no generation is current.
    pub fn shutdown(&self) {
        let mut objects = self.objects.write().expect("Failed to write-lock the heap");
        objects.clear();
        self.total_refs.store(0, Ordering::Release);
        self.shut_down.store(true, Ordering::Release);
        self.generation.fetch_add(1, Ordering::AcqRel);
        log::info!("Heap shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Reclaims every object whose reference count is zero.
    ///
    /// Returns the number of reclaimed objects.
    pub fn collect(&self) -> usize {
        let mut objects = self.objects.write().expect("Failed to write-lock the heap");
        let before = objects.len();
        objects.retain(|_, object| object.refs > 0);
        let reclaimed = before - objects.len();
        log::debug!("Collected {} unreferenced objects", reclaimed);
        reclaimed
    }

    /// Reference count of an object, or [None] if it does not exist.
    pub fn ref_count(&self, object: ObjectId) -> Option<usize> {
        self.objects
            .read()
            .expect("Failed to read-lock the heap")
            .get(&object)
            .map(|object| object.refs)
    }

    /// Sum of the reference counts of every object.
    pub fn total_refs(&self) -> usize {
        self.total_refs.load(Ordering::Acquire)
    }

    /// Checks if an object exists.
    pub fn alive(&self, object: ObjectId) -> bool {
        self.objects
            .read()
            .expect("Failed to read-lock the heap")
            .contains_key(&object)
    }

    /// Number of objects.
    pub fn len(&self) -> usize {
        self.objects.read().expect("Failed to read-lock the heap").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Runtime for Heap {
    fn check_generation(&self, generation: Generation) -> bool {
        !self.is_shut_down() && self.generation() == generation
    }

    fn increment_ref(&self, generation: Generation, object: ObjectId) -> Result<(), Error> {
        let mut objects = self.objects.write().expect("Failed to write-lock the heap");
        // Restarts also hold the write lock
        if !self.check_generation(generation) {
            return Err(Error::StaleRuntime(generation));
        }
        let target = objects
            .get_mut(&object)
            .ok_or(Error::InvalidObject(object))?;
        target.refs += 1;
        self.total_refs.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn decrement_ref(&self, generation: Generation, object: ObjectId) -> Result<(), Error> {
        let mut objects = self.objects.write().expect("Failed to write-lock the heap");
        if !self.check_generation(generation) {
            return Err(Error::StaleRuntime(generation));
        }
        let target = objects
            .get_mut(&object)
            .ok_or(Error::InvalidObject(object))?;
        debug_assert!(
            target.refs > 0,
            "Reference count of object {} underflowed",
            object
        );
        if target.refs == 0 {
            return Err(Error::RefCountUnderflow(object));
        }
        target.refs -= 1;
        self.total_refs.fetch_sub(1, Ordering::AcqRel);
        if target.refs == 0 {
            objects.remove(&object);
            log::trace!("Reclaimed object {}", object);
        }
        Ok(())
    }

    fn repr(&self, object: ObjectId) -> Result<String, Error> {
        self.objects
            .read()
            .expect("Failed to read-lock the heap")
            .get(&object)
            .map(|object| object.repr.clone())
            .ok_or(Error::InvalidObject(object))
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self {
            objects: HashMap::with_capacity(0).into(),
            generation: 0.into(),
            shut_down: false.into(),
            counter: 0.into(),
            total_refs: 0.into(),
        }
    }
}
