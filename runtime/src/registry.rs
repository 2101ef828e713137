//! Storing handles for code that can only hold integers.
//!
//! A foreign caller such as a JVM cannot own a [NativeHandle] directly. It stores the handle here
//! and keeps the [Slot] instead. Removing the slot drops the handle, which gives back its reference
//! count. Removing it again does nothing, so a finalizer racing with an explicit close is harmless.
//!
//! Slots are drawn from a counter that several registries may share, so that a slot handed out by
//! one of them is never handed out again by a registry replacing it. Only non-negative slots are
//! used.

use crate::Error;
use crate::NativeHandle;
use crate::Runtime;
use crate::Slot;
use std::collections::HashMap;
use std::sync::atomic::AtomicI32;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::RwLock;

/// Number of distinct non-negative [Slot]s.
pub const MAX_SLOTS: usize = Slot::MAX as usize + 1;

/// Thread-safe collection of [NativeHandle]s.
pub struct Registry<R: Runtime + ?Sized> {
    pool: RwLock<HashMap<Slot, Arc<NativeHandle<R>>>>,
    counter: Arc<AtomicI32>,
    capacity: usize,
}

impl<R: Runtime + ?Sized> Registry<R> {
    /// Creates a registry drawing its slots from `counter`.
    pub fn with_counter(counter: Arc<AtomicI32>) -> Self {
        Self {
            pool: HashMap::with_capacity(0).into(),
            counter,
            capacity: MAX_SLOTS,
        }
    }

    /// Limits how many handles may be stored at once, at most [MAX_SLOTS].
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.min(MAX_SLOTS);
        self
    }

    /// Stores a handle.
    ///
    /// Slots still in use are skipped once the counter wraps around. If the registry is full the
    /// handle is dropped, and thereby released, and [Error::SlotsExhausted] is returned.
    pub fn store(&self, handle: NativeHandle<R>) -> Result<Slot, Error> {
        let mut pool_guard = self.pool.write().expect("Failed to write-lock the registry");
        if pool_guard.len() >= self.capacity {
            drop(pool_guard);
            log::warn!("Registry is full, releasing object {}", handle.object());
            return Err(Error::SlotsExhausted);
        }
        // Terminates because fewer than `MAX_SLOTS` slots are taken
        let slot = loop {
            let candidate = self.next_slot();
            if candidate >= 0 && !pool_guard.contains_key(&candidate) {
                break candidate;
            }
        };
        pool_guard.insert(slot, Arc::new(handle));
        Ok(slot)
    }

    /// Advances the counter, wrapping from [Slot::MAX] back to 0.
    fn next_slot(&self) -> Slot {
        let next = |slot: Slot| Some(slot.checked_add(1).unwrap_or(0));
        match self
            .counter
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, next)
        {
            Ok(previous) | Err(previous) => previous,
        }
    }

    /// Runs an action on a handle.
    pub fn peek<T>(&self, slot: Slot, action: impl FnOnce(&NativeHandle<R>) -> T) -> Result<T, Error> {
        let pool_guard = self.pool.read().expect("Failed to read-lock the registry");
        let handle = pool_guard.get(&slot).cloned().ok_or(Error::NoSuchSlot(slot))?;
        drop(pool_guard);

        Ok(action(&handle))
    }

    /// Drops the handle stored at `slot`.
    ///
    /// Returns whether there was one.
    pub fn remove(&self, slot: Slot) -> bool {
        let handle = self
            .pool
            .write()
            .expect("Failed to write-lock the registry")
            .remove(&slot);
        // Released outside of the lock
        match handle {
            Some(handle) => {
                handle.release();
                true
            }
            None => false,
        }
    }

    /// Checks if a handle is stored at `slot`.
    pub fn alive(&self, slot: Slot) -> bool {
        self.pool
            .read()
            .expect("Failed to read-lock the registry")
            .contains_key(&slot)
    }

    pub fn len(&self) -> usize {
        self.pool.read().expect("Failed to read-lock the registry").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every stored handle.
    pub fn clear(&self) {
        let drained: Vec<_> = self
            .pool
            .write()
            .expect("Failed to write-lock the registry")
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        for handle in drained {
            handle.release();
        }
    }
}

impl<R: Runtime + ?Sized> Default for Registry<R> {
    fn default() -> Self {
        Self::with_counter(Default::default())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Generation;
    use crate::Heap;

    fn setup() -> (Arc<Heap>, Registry<Heap>) {
        (Arc::new(Heap::default()), Registry::default())
    }

    #[test]
    fn store_and_remove() {
        let (heap, registry) = setup();
        let object = heap.store("a");
        let slot = registry.store(NativeHandle::new(heap.clone(), heap.generation(), object).unwrap()).unwrap();

        assert!(registry.alive(slot));
        assert_eq!(Some(1), heap.ref_count(object));

        assert!(registry.remove(slot));
        assert!(!registry.alive(slot));
        assert_eq!(None, heap.ref_count(object));
    }

    #[test]
    fn remove_twice() {
        let (heap, registry) = setup();
        let object = heap.store("a");
        heap.increment_ref(heap.generation(), object).unwrap();
        let slot = registry.store(NativeHandle::new(heap.clone(), heap.generation(), object).unwrap()).unwrap();

        assert!(registry.remove(slot));
        assert!(!registry.remove(slot));
        assert_eq!(Some(1), heap.ref_count(object));
    }

    #[test]
    fn slots_are_distinct() {
        let (heap, registry) = setup();
        let object = heap.store("a");
        let first = registry.store(NativeHandle::new(heap.clone(), heap.generation(), object).unwrap()).unwrap();
        let second = registry.store(NativeHandle::new(heap.clone(), heap.generation(), object).unwrap()).unwrap();

        assert_ne!(first, second);
        assert_eq!(2, registry.len());
        assert_eq!(Some(2), heap.ref_count(object));
    }

    #[test]
    fn peek() {
        let (heap, registry) = setup();
        let object = heap.store("'hello'");
        let slot = registry.store(NativeHandle::new(heap.clone(), heap.generation(), object).unwrap()).unwrap();

        let expected = "NativeHandle['hello']";
        let actual = registry.peek(slot, |handle| handle.repr()).unwrap().unwrap();
        assert_eq!(expected, actual);

        assert!(matches!(
            registry.peek(slot + 1, |_| ()),
            Err(Error::NoSuchSlot(_))
        ));
    }

    #[test]
    fn peek_keeps_handle_across_remove() {
        let (heap, registry) = setup();
        let object = heap.store("a");
        let slot = registry.store(NativeHandle::new(heap.clone(), heap.generation(), object).unwrap()).unwrap();

        let released = registry
            .peek(slot, |handle| {
                handle.release();
                handle.is_released()
            })
            .unwrap();
        assert!(released);
        assert!(registry.remove(slot));
        assert_eq!(None, heap.ref_count(object));
    }

    #[test]
    fn clear() {
        let (heap, registry) = setup();
        for _ in 0..3 {
            let object = heap.store("a");
            registry
                .store(NativeHandle::new(heap.clone(), Generation(0), object).unwrap())
                .unwrap();
        }
        assert_eq!(3, heap.total_refs());

        registry.clear();
        assert!(registry.is_empty());
        assert_eq!(0, heap.total_refs());
    }

    fn attach(heap: &Arc<Heap>) -> NativeHandle<Heap> {
        let object = heap.store("a");
        NativeHandle::new(heap.clone(), heap.generation(), object).unwrap()
    }

    #[test]
    fn shared_counter() {
        let heap = Arc::new(Heap::default());
        let counter = Arc::new(AtomicI32::new(0));
        let old = Registry::<Heap>::with_counter(counter.clone());
        let new = Registry::<Heap>::with_counter(counter);

        let old_slot = old.store(attach(&heap)).unwrap();
        old.clear();
        let new_slot = new.store(attach(&heap)).unwrap();

        assert_ne!(old_slot, new_slot);
        assert!(!new.remove(old_slot));
        assert!(new.alive(new_slot));
    }

    #[test]
    fn wraps_around_and_skips_taken_slots() {
        let heap = Arc::new(Heap::default());
        let counter = Arc::new(AtomicI32::new(Slot::MAX));
        let registry = Registry::<Heap>::with_counter(counter.clone());

        assert_eq!(Slot::MAX, registry.store(attach(&heap)).unwrap());
        assert_eq!(0, registry.store(attach(&heap)).unwrap());

        counter.store(Slot::MAX, Ordering::SeqCst);
        assert_eq!(1, registry.store(attach(&heap)).unwrap());
    }

    #[test]
    fn skips_negative_slots() {
        let heap = Arc::new(Heap::default());
        let registry = Registry::<Heap>::with_counter(Arc::new(AtomicI32::new(-2)));
        assert_eq!(0, registry.store(attach(&heap)).unwrap());
    }

    #[test]
    fn full() {
        let heap = Arc::new(Heap::default());
        let registry = Registry::<Heap>::default().with_capacity(2);
        registry.store(attach(&heap)).unwrap();
        registry.store(attach(&heap)).unwrap();

        assert!(matches!(
            registry.store(attach(&heap)),
            Err(Error::SlotsExhausted)
        ));
        assert_eq!(2, registry.len());
        assert_eq!(2, heap.total_refs());
    }
}
