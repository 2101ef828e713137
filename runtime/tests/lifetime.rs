use std::collections::VecDeque;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Barrier;
use tether_runtime::config::DetachedPolicy;
use tether_runtime::Binder;
use tether_runtime::Config;
use tether_runtime::Error;
use tether_runtime::Heap;
use tether_runtime::NativeHandle;
use tether_runtime::Registry;
use tether_runtime::Runtime;

const THREADS: usize = 8;
const HANDLES_PER_THREAD: usize = 1250;

/// Handles each thread keeps alive at once while churning.
const WINDOW: usize = 4;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn net_delta_is_zero() {
    init_logger();
    let heap = Arc::new(Heap::default());
    let object = heap.store("42");
    let binder = Binder::new(heap.clone(), Default::default());

    {
        let handle = binder.attach(heap.generation(), object).unwrap();
        assert_eq!(Some(1), heap.ref_count(object));
        assert_eq!("NativeHandle[42]", handle.repr().unwrap());
    }
    assert_eq!(0, heap.total_refs());
    assert!(!heap.alive(object));
}

#[test]
fn stale_generation_never_increments() {
    init_logger();
    let heap = Arc::new(Heap::default());
    let old = heap.generation();
    heap.restart();
    let object = heap.store("x");

    let err = NativeHandle::new(heap.clone(), old, object).unwrap_err();
    assert!(matches!(err, Error::StaleRuntime(generation) if generation == old));
    assert_eq!(Some(0), heap.ref_count(object));
}

#[test]
fn drop_after_shutdown_is_quiet() {
    init_logger();
    let heap = Arc::new(Heap::default());
    let object = heap.store("x");
    let handle = NativeHandle::new(heap.clone(), heap.generation(), object).unwrap();

    heap.shutdown();
    assert!(matches!(handle.repr(), Err(Error::DetachedRuntime(_))));
    drop(handle);
    assert_eq!(0, heap.total_refs());
}

#[test]
fn old_handle_does_not_touch_restarted_heap() {
    init_logger();
    let heap = Arc::new(Heap::default());
    let object = heap.store("old");
    let handle = NativeHandle::new(heap.clone(), heap.generation(), object).unwrap();

    let generation = heap.restart();
    let fresh = heap.store("new");
    let pinned = NativeHandle::new(heap.clone(), generation, fresh).unwrap();

    drop(handle);
    assert_eq!(Some(1), heap.ref_count(fresh));
    assert_eq!(1, heap.total_refs());
    drop(pinned);
}

#[test]
fn placeholder_policy_from_config() {
    init_logger();
    let config =
        Config::from_toml_str("type_name = \"PythonObject\"\n[detached]\npolicy = \"placeholder\"")
            .unwrap();
    assert_eq!(DetachedPolicy::Placeholder, config.detached.policy);

    let heap = Arc::new(Heap::default());
    let object = heap.store("None");
    let handle = Binder::new(heap.clone(), config)
        .attach(heap.generation(), object)
        .unwrap();
    assert_eq!("PythonObject[None]", handle.repr().unwrap());

    heap.restart();
    assert_eq!("PythonObject[<detached>]", handle.repr().unwrap());
}

#[test]
fn concurrent_attach_and_drop() {
    init_logger();
    let heap = Arc::new(Heap::default());
    let object = heap.store("shared");
    heap.increment_ref(heap.generation(), object).unwrap();
    let binder = Binder::new(heap.clone(), Default::default());
    let generation = heap.generation();

    let attached = Arc::new(Barrier::new(THREADS + 1));
    let halved = Arc::new(Barrier::new(THREADS + 1));
    let checked = Arc::new(Barrier::new(THREADS + 1));
    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let binder = binder.clone();
            let attached = attached.clone();
            let halved = halved.clone();
            let checked = checked.clone();
            std::thread::spawn(move || {
                let mut handles: Vec<_> = (0..HANDLES_PER_THREAD)
                    .map(|_| binder.attach(generation, object).unwrap())
                    .collect();
                attached.wait();
                handles.truncate(HANDLES_PER_THREAD / 2);
                halved.wait();
                checked.wait();
                drop(handles);
            })
        })
        .collect();

    attached.wait();
    assert_eq!(THREADS * HANDLES_PER_THREAD + 1, heap.total_refs());
    halved.wait();
    assert_eq!(THREADS * (HANDLES_PER_THREAD / 2) + 1, heap.total_refs());
    checked.wait();

    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(Some(1), heap.ref_count(object));
    assert_eq!(1, heap.total_refs());
}

/// Progress of attaching and dropping across every thread.
#[derive(Default)]
struct Progress {
    attach_begun: AtomicUsize,
    attach_done: AtomicUsize,
    drop_begun: AtomicUsize,
    drop_done: AtomicUsize,
    finished: AtomicUsize,
}

impl Progress {
    /// Range the number of live references must lie in while [Heap::total_refs] is read.
    fn bounds(&self, read: impl FnOnce() -> usize) -> (isize, isize, isize) {
        let attach_done = self.attach_done.load(Ordering::SeqCst) as isize;
        let drop_done = self.drop_done.load(Ordering::SeqCst) as isize;
        let refs = read() as isize;
        let attach_begun = self.attach_begun.load(Ordering::SeqCst) as isize;
        let drop_begun = self.drop_begun.load(Ordering::SeqCst) as isize;
        (attach_done - drop_begun, refs, attach_begun - drop_done)
    }
}

#[test]
fn interleaved_attach_and_drop() {
    init_logger();
    let heap = Arc::new(Heap::default());
    let object = heap.store("shared");
    heap.increment_ref(heap.generation(), object).unwrap();
    let binder = Binder::new(heap.clone(), Default::default());
    let generation = heap.generation();
    let progress = Arc::new(Progress::default());

    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let binder = binder.clone();
            let progress = progress.clone();
            std::thread::spawn(move || {
                let mut window = VecDeque::with_capacity(WINDOW + 1);
                let drop_oldest = |window: &mut VecDeque<NativeHandle<Heap>>| {
                    progress.drop_begun.fetch_add(1, Ordering::SeqCst);
                    drop(window.pop_front());
                    progress.drop_done.fetch_add(1, Ordering::SeqCst);
                };
                for _ in 0..HANDLES_PER_THREAD {
                    progress.attach_begun.fetch_add(1, Ordering::SeqCst);
                    let handle = binder.attach(generation, object).unwrap();
                    progress.attach_done.fetch_add(1, Ordering::SeqCst);
                    window.push_back(handle);
                    if window.len() > WINDOW {
                        drop_oldest(&mut window);
                    }
                }
                while !window.is_empty() {
                    drop_oldest(&mut window);
                }
                progress.finished.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();

    let mut samples = 0;
    loop {
        let done = progress.finished.load(Ordering::SeqCst) == THREADS;
        let (low, refs, high) = progress.bounds(|| heap.total_refs() - 1);
        assert!(
            low <= refs && refs <= high,
            "{} references outside of {}..={}",
            refs,
            low,
            high
        );
        samples += 1;
        if done {
            break;
        }
        std::thread::yield_now();
    }
    log::info!("Took {} samples", samples);

    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(
        THREADS * HANDLES_PER_THREAD,
        progress.drop_done.load(Ordering::SeqCst)
    );
    assert_eq!(Some(1), heap.ref_count(object));
    assert_eq!(1, heap.total_refs());
}

#[test]
fn concurrent_registry_double_release() {
    init_logger();
    let heap = Arc::new(Heap::default());
    let object = heap.store("shared");
    heap.increment_ref(heap.generation(), object).unwrap();
    let registry = Arc::new(Registry::<Heap>::default());
    let slots: Vec<_> = (0..THREADS * HANDLES_PER_THREAD)
        .map(|_| {
            let handle = NativeHandle::new(heap.clone(), heap.generation(), object).unwrap();
            registry.store(handle).unwrap()
        })
        .collect();
    let slots = Arc::new(slots);

    // Two threads race to remove every slot, as an explicit close and a finalizer would
    let workers: Vec<_> = (0..2)
        .map(|_| {
            let registry = registry.clone();
            let slots = slots.clone();
            std::thread::spawn(move || slots.iter().filter(|slot| registry.remove(**slot)).count())
        })
        .collect();
    let removed: usize = workers.into_iter().map(|worker| worker.join().unwrap()).sum();

    assert_eq!(THREADS * HANDLES_PER_THREAD, removed);
    assert!(registry.is_empty());
    assert_eq!(Some(1), heap.ref_count(object));
}
