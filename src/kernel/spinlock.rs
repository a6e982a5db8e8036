use crate::proc::mytid;
use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut, Drop};
use core::sync::atomic::{AtomicUsize, Ordering};

// Mutual exclusion spin lock for short critical sections over kernel
// tables. Never held across a sleep; proc::sleep() releases it first.
#[derive(Debug)]
pub struct Mutex<T> {
    name: &'static str, // Name of lock
    locked: AtomicUsize, // Holding thread, 0 if free
    data: UnsafeCell<T>, // actual data
}

#[derive(Debug)]
pub struct MutexGuard<'a, T: 'a> {
    mutex: &'a Mutex<T>,
}

impl<T> Mutex<T> {
    pub const fn new(value: T, name: &'static str) -> Mutex<T> {
        Mutex {
            locked: AtomicUsize::new(0),
            data: UnsafeCell::new(value),
            name,
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        assert!(!self.holding(), "acquire {}", self.name);
        let me = mytid();
        loop {
            if self
                .locked
                .compare_exchange(0, me, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                break MutexGuard { mutex: self };
            }
            core::hint::spin_loop();
            std::thread::yield_now();
        }
    }

    // Check whether this thread is holding the lock.
    fn holding(&self) -> bool {
        self.locked.load(Ordering::Relaxed) == mytid()
    }

    pub fn unlock(guard: MutexGuard<'_, T>) -> &'_ Mutex<T> {
        guard.mutex()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

unsafe impl<T: Send> Sync for Mutex<T> {}
unsafe impl<T: Send> Send for Mutex<T> {}

impl<'a, T: 'a> MutexGuard<'a, T> {
    // Returns a reference to the original 'Mutex' object.
    pub fn mutex(&self) -> &'a Mutex<T> {
        self.mutex
    }

    pub fn holding(&self) -> bool {
        self.mutex.holding()
    }
}

impl<'a, T: 'a> Drop for MutexGuard<'a, T> {
    fn drop(&mut self) {
        assert!(self.holding(), "release {}", self.mutex.name);
        self.mutex.locked.store(0, Ordering::Release);
    }
}

impl<'a, T: 'a> Deref for MutexGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<'a, T: 'a> DerefMut for MutexGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.mutex.data.get() }
    }
}

unsafe impl<T: Sync> Sync for MutexGuard<'_, T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn counter_under_contention() {
        let m = Arc::new(Mutex::new(0usize, "counter"));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let m = Arc::clone(&m);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        *m.lock() += 1;
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*m.lock(), 4000);
    }

    #[test]
    #[should_panic(expected = "acquire twice")]
    fn recursive_acquire_panics() {
        let m = Mutex::new((), "twice");
        let _g = m.lock();
        let _g2 = m.lock();
    }
}
