//! A readers-writer lock with writer preference and a bounded number
//! of concurrent readers. Once a writer starts waiting no new readers
//! may enter; the readers already holding the lock drain out before
//! the writer proceeds. The reader bound keeps a burst of worker
//! threads from starving the session sweeper.

use std::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
    sync::{Condvar, Mutex},
};

#[derive(Debug, Default)]
struct LockState {
    readers: usize,
    writer: bool,
    writers_waiting: usize,
}

#[derive(Debug)]
pub struct BoundedRwLock<T> {
    state: Mutex<LockState>,
    readers_cv: Condvar,
    writers_cv: Condvar,
    max_readers: usize,
    data: UnsafeCell<T>,
}

// Safety: access to `data` is mediated by the reader/writer protocol
// below, which only ever hands out one &mut or up to max_readers &.
unsafe impl<T: Send> Send for BoundedRwLock<T> {}
unsafe impl<T: Send + Sync> Sync for BoundedRwLock<T> {}

pub struct ReadGuard<'a, T> {
    lock: &'a BoundedRwLock<T>,
}

pub struct WriteGuard<'a, T> {
    lock: &'a BoundedRwLock<T>,
}

impl<T> BoundedRwLock<T> {
    pub fn new(data: T, max_readers: usize) -> Self {
        assert!(max_readers > 0);
        BoundedRwLock {
            state: Mutex::new(LockState::default()),
            readers_cv: Condvar::new(),
            writers_cv: Condvar::new(),
            max_readers,
            data: UnsafeCell::new(data),
        }
    }

    pub fn read(&self) -> ReadGuard<'_, T> {
        let mut state = self.state.lock().unwrap();
        while state.writer || state.writers_waiting > 0 || state.readers == self.max_readers {
            state = self.readers_cv.wait(state).unwrap();
        }
        state.readers += 1;
        ReadGuard { lock: self }
    }

    pub fn write(&self) -> WriteGuard<'_, T> {
        let mut state = self.state.lock().unwrap();
        state.writers_waiting += 1;
        while state.writer || state.readers > 0 {
            state = self.writers_cv.wait(state).unwrap();
        }
        state.writers_waiting -= 1;
        state.writer = true;
        WriteGuard { lock: self }
    }
}

impl<T> Drop for ReadGuard<'_, T> {
    fn drop(&mut self) {
        let mut state = self.lock.state.lock().unwrap();
        state.readers -= 1;
        if state.readers == 0 {
            self.lock.writers_cv.notify_one();
        }
        // a reader slot freed up
        self.lock.readers_cv.notify_one();
    }
}

impl<T> Drop for WriteGuard<'_, T> {
    fn drop(&mut self) {
        let mut state = self.lock.state.lock().unwrap();
        state.writer = false;
        if state.writers_waiting > 0 {
            self.lock.writers_cv.notify_one();
        } else {
            self.lock.readers_cv.notify_all();
        }
    }
}

impl<T> Deref for ReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: the protocol guarantees no writer is active while
        // any ReadGuard exists.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> Deref for WriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: this guard holds the exclusive write hold.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for WriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // Safety: this guard holds the exclusive write hold.
        unsafe { &mut *self.lock.data.get() }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        thread, time,
    };
    use ntest::timeout;

    #[test]
    #[timeout(30000)]
    fn readers_share_writers_exclude() {
        let lock = Arc::new(BoundedRwLock::new(0u32, 4));

        {
            let _r1 = lock.read();
            let _r2 = lock.read();
        }

        {
            let mut w = lock.write();
            *w += 1;
        }
        assert_eq!(*lock.read(), 1);
    }

    #[test]
    #[timeout(30000)]
    fn pending_writer_blocks_new_readers() {
        let lock = Arc::new(BoundedRwLock::new(0u32, 4));
        let reader_entered = Arc::new(AtomicUsize::new(0));

        let held = lock.read();

        let wlock = Arc::clone(&lock);
        let writer = thread::spawn(move || {
            let mut w = wlock.write();
            *w = 7;
        });
        // let the writer enter its wait
        thread::sleep(time::Duration::from_millis(100));

        let rlock = Arc::clone(&lock);
        let rentered = Arc::clone(&reader_entered);
        let reader = thread::spawn(move || {
            let r = rlock.read();
            rentered.store(1, Ordering::SeqCst);
            assert_eq!(*r, 7, "late reader must observe the writer's value");
        });
        thread::sleep(time::Duration::from_millis(100));
        assert_eq!(
            reader_entered.load(Ordering::SeqCst),
            0,
            "reader entered while a writer was waiting"
        );

        drop(held);
        writer.join().expect("writer to finish");
        reader.join().expect("reader to finish");
    }

    #[test]
    #[timeout(30000)]
    fn reader_cap_is_enforced() {
        let lock = Arc::new(BoundedRwLock::new((), 2));
        let concurrent = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = vec![];
        for _ in 0..8 {
            let lock = Arc::clone(&lock);
            let concurrent = Arc::clone(&concurrent);
            let peak = Arc::clone(&peak);
            handles.push(thread::spawn(move || {
                let _r = lock.read();
                let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(time::Duration::from_millis(20));
                concurrent.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.join().expect("reader thread");
        }
        assert!(peak.load(Ordering::SeqCst) <= 2, "reader cap exceeded");
    }
}
