//! Bounded parallel map.
//!
//! One producer (the calling thread) feeds a bounded task queue, a fixed set
//! of workers turns tasks into results, and a collector thread drains the
//! bounded result queue. A full task queue blocks the producer, which is the
//! backpressure that keeps a fast directory walk from racing ahead of hashing.
//!
//! Results come back in completion order; callers sort them.

use crossbeam_channel::{bounded, Sender};
use std::panic;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    workers: usize,
    queue_depth: usize,
}

/// Producer handle passed to the `produce` closure of [`WorkerPool::run`].
pub struct Feeder<'a, T> {
    tx: Sender<T>,
    halted: &'a AtomicBool,
}

impl<T> Feeder<'_, T> {
    /// Queue a task, blocking while the queue is full.
    ///
    /// Returns `false` once the pool has been halted; the producer should
    /// stop producing.
    pub fn push(&self, task: T) -> bool {
        if self.is_halted() {
            return false;
        }
        self.tx.send(task).is_ok()
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }
}

impl WorkerPool {
    pub fn new(workers: usize, queue_depth: usize) -> Self {
        Self {
            workers: workers.max(1),
            queue_depth: queue_depth.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `work` over everything `produce` pushes.
    ///
    /// `halt_on` is evaluated by the collector for every result; when it
    /// returns `true` the pool is halted: further pushes are refused and tasks
    /// already queued are drained without running `work`. Workers themselves
    /// never stop the run.
    ///
    /// An error from `produce` is returned after the pool has wound down.
    pub fn run<T, R, E, P, W, H>(&self, produce: P, work: W, halt_on: H) -> Result<Vec<R>, E>
    where
        T: Send,
        R: Send,
        P: FnOnce(&Feeder<'_, T>) -> Result<(), E>,
        W: Fn(T) -> R + Sync,
        H: Fn(&R) -> bool + Sync,
    {
        let (task_tx, task_rx) = bounded::<T>(self.queue_depth);
        let (result_tx, result_rx) = bounded::<R>(self.queue_depth);
        let halted = AtomicBool::new(false);

        thread::scope(|scope| {
            for _ in 0..self.workers {
                let task_rx = task_rx.clone();
                let result_tx = result_tx.clone();
                let work = &work;
                let halted = &halted;
                scope.spawn(move || {
                    for task in task_rx.iter() {
                        if halted.load(Ordering::Acquire) {
                            continue;
                        }
                        if result_tx.send(work(task)).is_err() {
                            break;
                        }
                    }
                });
            }
            // Only workers hold these from here on
            drop(task_rx);
            drop(result_tx);

            let halted_ref = &halted;
            let halt_on = &halt_on;
            let collector = scope.spawn(move || {
                let mut results = Vec::new();
                for result in result_rx.iter() {
                    if halt_on(&result) {
                        halted_ref.store(true, Ordering::Release);
                    }
                    results.push(result);
                }
                results
            });

            let feeder = Feeder {
                tx: task_tx,
                halted: &halted,
            };
            let produced = produce(&feeder);
            // Closing the queue lets the workers, then the collector, finish
            drop(feeder);

            let results = match collector.join() {
                Ok(results) => results,
                Err(payload) => panic::resume_unwind(payload),
            };
            produced.map(|()| results)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn test_maps_every_task() {
        let pool = WorkerPool::new(4, 2);
        let mut results: Vec<u64> = pool
            .run(
                |feeder| -> Result<(), ()> {
                    for i in 0..100u64 {
                        assert!(feeder.push(i));
                    }
                    Ok(())
                },
                |i| i * i,
                |_| false,
            )
            .unwrap();

        results.sort_unstable();
        let expected: Vec<u64> = (0..100u64).map(|i| i * i).collect();
        assert_eq!(results, expected);
    }

    #[test]
    fn test_producer_error_is_returned() {
        let pool = WorkerPool::new(2, 1);
        let result: Result<Vec<u32>, &str> = pool.run(
            |feeder| {
                feeder.push(1);
                Err("walk failed")
            },
            |i| i,
            |_| false,
        );
        assert_eq!(result.unwrap_err(), "walk failed");
    }

    #[test]
    fn test_halt_stops_producer() {
        let pool = WorkerPool::new(2, 1);
        let executed = AtomicUsize::new(0);
        let mut refused_at = None;

        let results: Vec<u32> = pool
            .run(
                |feeder| -> Result<(), ()> {
                    for i in 0..10_000u32 {
                        if !feeder.push(i) {
                            refused_at = Some(i);
                            break;
                        }
                    }
                    Ok(())
                },
                |i| {
                    executed.fetch_add(1, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(1));
                    i
                },
                |i| *i == 3,
            )
            .unwrap();

        assert!(results.contains(&3));
        assert!(refused_at.is_some());
        assert!(executed.load(Ordering::SeqCst) < 10_000);
    }

    #[test]
    fn test_zero_sizes_are_clamped() {
        let pool = WorkerPool::new(0, 0);
        assert_eq!(pool.workers(), 1);
        let results: Vec<u8> = pool
            .run(
                |feeder| -> Result<(), ()> {
                    feeder.push(7);
                    Ok(())
                },
                |i| i + 1,
                |_| false,
            )
            .unwrap();
        assert_eq!(results, vec![8]);
    }
}
