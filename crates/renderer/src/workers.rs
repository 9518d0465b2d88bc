//! CPU decode worker pool.
//!
//! Cell expansion and rotation sampling are pure CPU work, so they run
//! on a bounded pool while the submission thread keeps recording GPU
//! commands. Workers never touch the GPU: a job produces a finished
//! pixel buffer which the submission thread uploads. Flushing a layer
//! joins that layer's outstanding jobs first, so upload order follows
//! layer order even when decode finishes out of order.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crossbeam_channel::{Sender, unbounded};
use vdp_protocol::ScreenId;

/// A fully decoded layer's pixels, ready for upload.
#[derive(Debug)]
pub struct DecodedLayer {
    pub screen: ScreenId,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u32>,
    /// Per-scanline line-color table indices (rotation layers only).
    pub line_colors: Vec<u8>,
}

type DecodeTask = Box<dyn FnOnce() -> DecodedLayer + Send + 'static>;

struct PoolShared {
    pending: Mutex<[usize; 7]>,
    done: Condvar,
    results: Mutex<Vec<DecodedLayer>>,
}

pub struct DecodePool {
    sender: Option<Sender<DecodeTask>>,
    workers: Vec<JoinHandle<()>>,
    shared: Arc<PoolShared>,
}

impl DecodePool {
    pub fn new(threads: usize) -> Self {
        let threads = threads.max(1);
        let (sender, receiver) = unbounded::<DecodeTask>();
        let shared = Arc::new(PoolShared {
            pending: Mutex::new([0; 7]),
            done: Condvar::new(),
            results: Mutex::new(Vec::new()),
        });
        let workers = (0..threads)
            .map(|i| {
                let receiver = receiver.clone();
                let shared = Arc::clone(&shared);
                std::thread::Builder::new()
                    .name(format!("layer-decode-{i}"))
                    .spawn(move || {
                        while let Ok(task) = receiver.recv() {
                            let layer = task();
                            let slot = layer.screen.index();
                            shared
                                .results
                                .lock()
                                .expect("decode results lock poisoned")
                                .push(layer);
                            let mut pending =
                                shared.pending.lock().expect("decode pending lock poisoned");
                            pending[slot] -= 1;
                            shared.done.notify_all();
                        }
                    })
                    .expect("failed to spawn decode worker")
            })
            .collect();
        Self {
            sender: Some(sender),
            workers,
            shared,
        }
    }

    /// Queue a decode job for `screen`. The job's result must report the
    /// same screen it was submitted under.
    pub fn submit<F>(&self, screen: ScreenId, job: F)
    where
        F: FnOnce() -> DecodedLayer + Send + 'static,
    {
        {
            let mut pending = self
                .shared
                .pending
                .lock()
                .expect("decode pending lock poisoned");
            pending[screen.index()] += 1;
        }
        self.sender
            .as_ref()
            .expect("decode pool already shut down")
            .send(Box::new(job))
            .expect("decode workers disconnected");
    }

    /// Block until every job submitted for `screen` has finished.
    pub fn join_layer(&self, screen: ScreenId) {
        let slot = screen.index();
        let mut pending = self
            .shared
            .pending
            .lock()
            .expect("decode pending lock poisoned");
        while pending[slot] > 0 {
            pending = self
                .shared
                .done
                .wait(pending)
                .expect("decode pending lock poisoned");
        }
    }

    /// Join `screen` and take its finished layers, in completion order.
    pub fn collect_layer(&self, screen: ScreenId) -> Vec<DecodedLayer> {
        self.join_layer(screen);
        let mut results = self
            .shared
            .results
            .lock()
            .expect("decode results lock poisoned");
        let mut taken = Vec::new();
        let mut i = 0;
        while i < results.len() {
            if results[i].screen == screen {
                taken.push(results.swap_remove(i));
            } else {
                i += 1;
            }
        }
        taken
    }
}

impl Drop for DecodePool {
    fn drop(&mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn layer(screen: ScreenId, tag: u32) -> DecodedLayer {
        DecodedLayer {
            screen,
            width: 1,
            height: 1,
            pixels: vec![tag],
            line_colors: Vec::new(),
        }
    }

    #[test]
    fn join_waits_for_the_layers_jobs() {
        let pool = DecodePool::new(2);
        pool.submit(ScreenId::Nbg0, || {
            std::thread::sleep(Duration::from_millis(20));
            layer(ScreenId::Nbg0, 1)
        });
        pool.join_layer(ScreenId::Nbg0);
        let done = pool.collect_layer(ScreenId::Nbg0);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].pixels, [1]);
    }

    #[test]
    fn collect_only_takes_the_requested_layer() {
        let pool = DecodePool::new(2);
        pool.submit(ScreenId::Nbg0, || layer(ScreenId::Nbg0, 1));
        pool.submit(ScreenId::Nbg1, || layer(ScreenId::Nbg1, 2));
        let nbg1 = pool.collect_layer(ScreenId::Nbg1);
        assert_eq!(nbg1.len(), 1);
        assert_eq!(nbg1[0].screen, ScreenId::Nbg1);
        let nbg0 = pool.collect_layer(ScreenId::Nbg0);
        assert_eq!(nbg0.len(), 1);
        assert_eq!(nbg0[0].pixels, [1]);
    }

    #[test]
    fn joining_an_idle_layer_returns_immediately() {
        let pool = DecodePool::new(1);
        pool.join_layer(ScreenId::Rbg0);
        assert!(pool.collect_layer(ScreenId::Rbg0).is_empty());
    }

    #[test]
    fn many_jobs_on_one_layer_all_arrive() {
        let pool = DecodePool::new(4);
        for tag in 0..16 {
            pool.submit(ScreenId::Sprite, move || layer(ScreenId::Sprite, tag));
        }
        let done = pool.collect_layer(ScreenId::Sprite);
        assert_eq!(done.len(), 16);
        let mut tags: Vec<u32> = done.iter().map(|l| l.pixels[0]).collect();
        tags.sort_unstable();
        assert_eq!(tags, (0..16).collect::<Vec<_>>());
    }
}
