//! Hammers a [Heap] with handles from many threads and checks the counts add up.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Barrier;
use tether_runtime::Binder;
use tether_runtime::Config;
use tether_runtime::Heap;
use tether_runtime::NativeHandle;
use tether_runtime::ObjectId;
use tether_runtime::Runtime;

/// Number of objects the handles are spread over.
const OBJECTS: usize = 16;

/// Handles each thread keeps alive at once while churning.
const WINDOW: usize = 4;

pub struct Plan {
    pub threads: usize,
    pub handles: usize,
    pub rounds: usize,
}

/// Outcome of a soak run, printed as JSON.
#[derive(Serialize, Debug)]
pub struct Report {
    pub threads: usize,
    pub handles: usize,
    pub rounds: usize,
    /// References held while every handle of a round was alive.
    pub peak_refs: usize,
    /// References left after every handle was dropped.
    pub final_refs: usize,
    /// Samples taken while handles were being attached and dropped.
    pub samples: usize,
    /// Samples outside of what the live handles allow.
    pub violations: usize,
    pub consistent: bool,
}

pub fn run(plan: &Plan, config: Config) -> anyhow::Result<Report> {
    anyhow::ensure!(plan.threads > 0, "At least one thread is needed");

    let heap = Arc::new(Heap::default());
    let objects: Vec<_> = (0..OBJECTS)
        .map(|idx| heap.store(format!("object-{}", idx)))
        .collect();
    // Pinned so that no object is reclaimed between rounds
    for object in objects.iter() {
        heap.increment_ref(heap.generation(), *object)?;
    }
    let baseline = heap.total_refs();
    let binder = Binder::new(heap.clone(), config);

    let mut peak_refs = 0;
    let mut samples = 0;
    let mut violations = 0;
    for round in 0..plan.rounds {
        log::info!("Round {} of {}", round + 1, plan.rounds);
        let (peak, sampled, violated) = run_round(plan, &binder, &objects, &heap, baseline)?;
        peak_refs = peak_refs.max(peak);
        samples += sampled;
        violations += violated;

        let (sampled, violated) = run_churn(plan, &binder, &objects, &heap, baseline)?;
        samples += sampled;
        violations += violated;
    }
    let final_refs = heap.total_refs();

    Ok(Report {
        threads: plan.threads,
        handles: plan.handles,
        rounds: plan.rounds,
        peak_refs,
        final_refs,
        samples,
        violations,
        consistent: violations == 0
            && final_refs == baseline
            && peak_refs == baseline + plan.handles,
    })
}

/// Returns the peak reference count, the number of samples and the number of violations.
fn run_round(
    plan: &Plan,
    binder: &Binder<Heap>,
    objects: &[ObjectId],
    heap: &Heap,
    baseline: usize,
) -> anyhow::Result<(usize, usize, usize)> {
    let generation = heap.generation();
    let attached = Arc::new(Barrier::new(plan.threads + 1));
    let sampled = Arc::new(Barrier::new(plan.threads + 1));
    let live = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = (0..plan.threads)
        .map(|idx| {
            let quota = plan.handles / plan.threads + usize::from(idx < plan.handles % plan.threads);
            let binder = binder.clone();
            let objects = objects.to_vec();
            let attached = attached.clone();
            let sampled = sampled.clone();
            let live = live.clone();
            let finished = finished.clone();
            std::thread::spawn(move || -> Result<(), tether_runtime::Error> {
                let mut handles = Vec::with_capacity(quota);
                let mut outcome = Ok(());
                for n in 0..quota {
                    match binder.attach(generation, objects[(idx + n) % objects.len()]) {
                        Ok(handle) => {
                            handles.push(handle);
                            live.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(err) => {
                            outcome = Err(err);
                            break;
                        }
                    }
                }
                attached.wait();
                sampled.wait();
                while let Some(handle) = handles.pop() {
                    live.fetch_sub(1, Ordering::SeqCst);
                    drop(handle);
                }
                finished.fetch_add(1, Ordering::SeqCst);
                outcome
            })
        })
        .collect();

    attached.wait();
    let peak = heap.total_refs();
    sampled.wait();

    // A handle leaves the live counter right before it is dropped, so at most one handle per
    // thread is counted by the heap but not by the live counter.
    let mut samples = 0;
    let mut violations = 0;
    while finished.load(Ordering::SeqCst) < plan.threads {
        let live_before = live.load(Ordering::SeqCst);
        let refs = heap.total_refs().saturating_sub(baseline);
        let live_after = live.load(Ordering::SeqCst);
        samples += 1;
        if refs < live_after || refs > live_before + plan.threads {
            log::warn!(
                "Sampled {} references while {} to {} handles are alive",
                refs,
                live_after,
                live_before
            );
            violations += 1;
        }
        std::thread::yield_now();
    }

    for worker in workers {
        worker
            .join()
            .map_err(|_| anyhow::anyhow!("A worker thread panicked"))??;
    }
    Ok((peak, samples, violations))
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
    fn drop_oldest(&self, window: &mut VecDeque<NativeHandle<Heap>>) {
        self.drop_begun.fetch_add(1, Ordering::SeqCst);
        drop(window.pop_front());
        self.drop_done.fetch_add(1, Ordering::SeqCst);
    }

    /// Reads the references held by live handles and the range they must lie in.
    ///
    /// A reference is counted by the heap somewhere between the `begun` and `done` counters of
    /// its attach or drop, so the lower bound is read before and the upper bound after.
    fn sample(&self, heap: &Heap, baseline: usize) -> (isize, isize, isize) {
        let attach_done = self.attach_done.load(Ordering::SeqCst) as isize;
        let drop_done = self.drop_done.load(Ordering::SeqCst) as isize;
        let refs = heap.total_refs() as isize - baseline as isize;
        let attach_begun = self.attach_begun.load(Ordering::SeqCst) as isize;
        let drop_begun = self.drop_begun.load(Ordering::SeqCst) as isize;
        (attach_done - drop_begun, refs, attach_begun - drop_done)
    }
}

/// Every thread attaches its share of handles one at a time, dropping the oldest once more than
/// [WINDOW] are alive, while the references are sampled.
///
/// Returns the number of samples and the number of violations.
fn run_churn(
    plan: &Plan,
    binder: &Binder<Heap>,
    objects: &[ObjectId],
    heap: &Heap,
    baseline: usize,
) -> anyhow::Result<(usize, usize)> {
    let generation = heap.generation();
    let progress = Arc::new(Progress::default());

    let workers: Vec<_> = (0..plan.threads)
        .map(|idx| {
            let quota = plan.handles / plan.threads + usize::from(idx < plan.handles % plan.threads);
            let binder = binder.clone();
            let objects = objects.to_vec();
            let progress = progress.clone();
            std::thread::spawn(move || -> Result<(), tether_runtime::Error> {
                let mut window = VecDeque::with_capacity(WINDOW + 1);
                let mut outcome = Ok(());
                for n in 0..quota {
                    progress.attach_begun.fetch_add(1, Ordering::SeqCst);
                    match binder.attach(generation, objects[(idx + n) % objects.len()]) {
                        Ok(handle) => {
                            progress.attach_done.fetch_add(1, Ordering::SeqCst);
                            window.push_back(handle);
                        }
                        Err(err) => {
                            progress.attach_done.fetch_add(1, Ordering::SeqCst);
                            outcome = Err(err);
                            break;
                        }
                    }
                    if window.len() > WINDOW {
                        progress.drop_oldest(&mut window);
                    }
                }
                while !window.is_empty() {
                    progress.drop_oldest(&mut window);
                }
                progress.finished.fetch_add(1, Ordering::SeqCst);
                outcome
            })
        })
        .collect();

    let mut samples = 0;
    let mut violations = 0;
    loop {
        let done = progress.finished.load(Ordering::SeqCst) == plan.threads;
        let (low, refs, high) = progress.sample(heap, baseline);
        samples += 1;
        if refs < low || refs > high {
            log::warn!("Sampled {} references outside of {}..={}", refs, low, high);
            violations += 1;
        }
        if done {
            break;
        }
        std::thread::yield_now();
    }

    for worker in workers {
        worker
            .join()
            .map_err(|_| anyhow::anyhow!("A worker thread panicked"))??;
    }
    Ok((samples, violations))
}
