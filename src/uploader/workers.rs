// urraca is a deduplicating, content-addressed snapshot engine
// Copyright (C) 2025  Javier Lancha Vázquez <javier.lancha@gmail.com>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-width worker pool gating concurrent file reads and uploads. The
/// pool width is the single global bound on upload parallelism.
pub(crate) struct WorkerPool {
    tx: Option<Sender<Job>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub(crate) fn new(num_workers: usize) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded::<Job>();

        let handles = (0..num_workers.max(1))
            .map(|i| {
                let rx: Receiver<Job> = rx.clone();
                std::thread::Builder::new()
                    .name(format!("upload-worker-{i}"))
                    .spawn(move || {
                        while let Ok(job) = rx.recv() {
                            job();
                        }
                    })
                    .expect("Failed to spawn upload worker")
            })
            .collect();

        Self {
            tx: Some(tx),
            handles,
        }
    }

    pub(crate) fn submit(&self, job: Job) {
        self.tx
            .as_ref()
            .expect("Pool is shut down")
            .send(job)
            .expect("Worker channel closed unexpectedly");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        drop(self.tx.take());
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_all_jobs_run() {
        let counter = Arc::new(AtomicUsize::new(0));

        {
            let pool = WorkerPool::new(4);
            for _ in 0..100 {
                let counter = counter.clone();
                pool.submit(Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }));
            }
            // Dropping the pool joins the workers.
        }

        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn test_concurrency_never_exceeds_width() {
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));

        {
            let pool = WorkerPool::new(3);
            for _ in 0..50 {
                let active = active.clone();
                let max_active = max_active.clone();
                pool.submit(Box::new(move || {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    max_active.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(std::time::Duration::from_millis(1));
                    active.fetch_sub(1, Ordering::SeqCst);
                }));
            }
        }

        assert!(max_active.load(Ordering::SeqCst) <= 3);
        assert!(max_active.load(Ordering::SeqCst) >= 1);
    }
}
