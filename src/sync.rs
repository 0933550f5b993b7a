//! The slot semaphore: the scheduler's sole back-pressure mechanism (see
//! spec §4.7, §5, §9). `threadpool::ThreadPool` happily queues unbounded
//! work, so bounding the number of in-flight blob-decode tasks is the
//! scheduler's own responsibility.
//!
//! Grounded on the `Mutex`+`Condvar` rendezvous pattern used for
//! cross-thread bookkeeping in `osmflat-rs`'s `parallel_process`, adapted
//! here into a classical counting semaphore.

use std::sync::{Arc, Condvar, Mutex};

#[derive(Clone)]
pub struct Semaphore {
    inner: Arc<(Mutex<usize>, Condvar)>,
}

impl Semaphore {
    pub fn new(permits: usize) -> Self {
        Semaphore {
            inner: Arc::new((Mutex::new(permits), Condvar::new())),
        }
    }

    /// Blocks the calling thread until a permit is available, then takes it.
    pub fn acquire(&self) {
        let (lock, cvar) = &*self.inner;
        let mut permits = lock.lock().unwrap();
        while *permits == 0 {
            permits = cvar.wait(permits).unwrap();
        }
        *permits -= 1;
    }

    /// Returns a permit to the pool, waking one waiter if any.
    pub fn release(&self) {
        let (lock, cvar) = &*self.inner;
        let mut permits = lock.lock().unwrap();
        *permits += 1;
        cvar.notify_one();
    }

    #[cfg(test)]
    pub fn available(&self) -> usize {
        *self.inner.0.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn acquire_blocks_until_release() {
        let sem = Semaphore::new(1);
        sem.acquire();
        assert_eq!(sem.available(), 0);

        let sem2 = sem.clone();
        let acquired = Arc::new(AtomicUsize::new(0));
        let acquired2 = acquired.clone();
        let handle = thread::spawn(move || {
            sem2.acquire();
            acquired2.store(1, Ordering::SeqCst);
        });

        thread::sleep(Duration::from_millis(50));
        assert_eq!(acquired.load(Ordering::SeqCst), 0);

        sem.release();
        handle.join().unwrap();
        assert_eq!(acquired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn never_exceeds_capacity() {
        let sem = Semaphore::new(2);
        sem.acquire();
        sem.acquire();
        assert_eq!(sem.available(), 0);
        sem.release();
        assert_eq!(sem.available(), 1);
        sem.release();
        assert_eq!(sem.available(), 2);
    }
}
