//! Single-threaded cooperative timer loop (spec §4.6).
//!
//! All surrogate-affecting work (`submit_post`, `set_nickname`, `close`,
//! surrogate creation) happens on this thread or synchronously from it, so
//! that per-user action drains never race each other.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;
use std::thread::JoinHandle;
use std::time::Instant;

/// Seconds elapsed since the scheduler was created. Not wall-clock time —
/// only meaningful relative to other `Timestamp`s from the same scheduler.
pub type Timestamp = f64;

type Task = Box<dyn FnOnce() + Send + 'static>;

enum Msg {
    Run(Timestamp, Task),
    Shutdown,
}

struct HeapEntry {
    deadline: Timestamp,
    seq: u64,
    task: Task,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so BinaryHeap (a max-heap) pops the smallest deadline
        // first; ties broken by insertion order (seq), also smallest-first.
        other
            .deadline
            .partial_cmp(&self.deadline)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// A handle to a running scheduler thread.
pub struct Scheduler {
    start: Instant,
    tx: Sender<Msg>,
    next_seq: Mutex<u64>,
    join_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Spawn the scheduler thread and return a handle to it.
    pub fn start() -> Self {
        let (tx, rx) = mpsc::channel::<Msg>();
        let handle = std::thread::Builder::new()
            .name("bridge-scheduler".to_string())
            .spawn(move || run_loop(rx))
            .expect("failed to spawn scheduler thread");
        Self {
            start: Instant::now(),
            tx,
            next_seq: Mutex::new(0),
            join_handle: Mutex::new(Some(handle)),
        }
    }

    /// Current monotonic time, in seconds since this scheduler was created.
    pub fn time(&self) -> Timestamp {
        self.start.elapsed().as_secs_f64()
    }

    fn seq(&self) -> u64 {
        let mut guard = self.next_seq.lock().unwrap();
        let v = *guard;
        *guard += 1;
        v
    }

    /// Run `task` as soon as possible on the scheduler thread.
    pub fn add_now<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let _ = self.tx.send(Msg::Run(self.time(), Box::new(task)));
    }

    /// Run `task` at or after absolute time `deadline` (per [`Scheduler::time`]).
    pub fn add_abs<F>(&self, deadline: Timestamp, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let _ = self.tx.send(Msg::Run(deadline, Box::new(task)));
    }

    /// Signal the scheduler thread to drain already-due work and exit.
    /// New `add_*` calls after this silently have no effect.
    pub fn shutdown(&self) {
        let _ = self.tx.send(Msg::Shutdown);
    }

    /// Block until the scheduler thread has terminated.
    pub fn join(&self) {
        if let Some(handle) = self.join_handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

fn run_loop(rx: Receiver<Msg>) {
    let mut heap: BinaryHeap<HeapEntry> = BinaryHeap::new();
    let mut seq: u64 = 0;
    let start = Instant::now();
    let now = || start.elapsed().as_secs_f64();

    'outer: loop {
        let wait = match heap.peek() {
            Some(top) => {
                let remaining = top.deadline - now();
                if remaining <= 0.0 {
                    std::time::Duration::from_secs(0)
                } else {
                    std::time::Duration::from_secs_f64(remaining)
                }
            }
            None => std::time::Duration::from_secs(3600),
        };

        match rx.recv_timeout(wait) {
            Ok(Msg::Run(deadline, task)) => {
                heap.push(HeapEntry { deadline, seq, task });
                seq += 1;
                continue;
            }
            Ok(Msg::Shutdown) => {
                let cutoff = now();
                while let Some(top) = heap.peek() {
                    if top.deadline > cutoff {
                        break;
                    }
                    let entry = heap.pop().unwrap();
                    (entry.task)();
                }
                break 'outer;
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                // Fall through and run due work below.
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break 'outer,
        }

        let cutoff = now();
        while let Some(top) = heap.peek() {
            if top.deadline > cutoff {
                break;
            }
            let entry = heap.pop().unwrap();
            (entry.task)();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::Arc;

    #[test]
    fn add_now_runs_eventually() {
        let sched = Scheduler::start();
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();
        sched.add_now(move || {
            ran2.fetch_add(1, AtomicOrdering::SeqCst);
        });
        std::thread::sleep(std::time::Duration::from_millis(100));
        sched.shutdown();
        sched.join();
        assert_eq!(ran.load(AtomicOrdering::SeqCst), 1);
    }

    #[test]
    fn add_abs_runs_in_order() {
        let sched = Scheduler::start();
        let order = Arc::new(Mutex::new(Vec::new()));
        let t0 = sched.time();
        for i in [3, 1, 2] {
            let order2 = order.clone();
            sched.add_abs(t0 + (i as f64) * 0.02, move || {
                order2.lock().unwrap().push(i);
            });
        }
        std::thread::sleep(std::time::Duration::from_millis(150));
        sched.shutdown();
        sched.join();
        assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn shutdown_discards_future_work() {
        let sched = Scheduler::start();
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();
        sched.add_abs(sched.time() + 10.0, move || {
            ran2.fetch_add(1, AtomicOrdering::SeqCst);
        });
        sched.shutdown();
        sched.join();
        assert_eq!(ran.load(AtomicOrdering::SeqCst), 0);
    }
}
