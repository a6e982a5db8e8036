use crate::{
    proc::{mytid, sleep, wakeup},
    spinlock::Mutex,
};
use core::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
};

// Sleeping locks

// Long-term locks for processes, may be held across disk I/O
#[derive(Debug)]
pub struct SleepLock<T> {
    lk: Mutex<SleepLockInfo>, // spinlock protecting this sleep lock
    data: UnsafeCell<T>,
    name: &'static str, // Name of lock
}
unsafe impl<T: Send> Sync for SleepLock<T> {}
unsafe impl<T: Send> Send for SleepLock<T> {}

#[derive(Debug)]
struct SleepLockInfo {
    locked: bool,
    tid: usize,
}

#[derive(Debug)]
pub struct SleepLockGuard<'a, T> {
    sleep_lock: &'a SleepLock<T>,
}

impl SleepLockInfo {
    pub const fn new(locked: bool, tid: usize) -> Self {
        SleepLockInfo { locked, tid }
    }
}

impl<T> SleepLock<T> {
    pub const fn new(data: T, name: &'static str) -> Self {
        Self {
            lk: Mutex::new(SleepLockInfo::new(false, 0), name),
            data: UnsafeCell::new(data),
            name,
        }
    }

    pub fn lock(&self) -> SleepLockGuard<'_, T> {
        let mut lk = self.lk.lock();
        let me = mytid();
        assert!(!(lk.locked && lk.tid == me), "acquire {}", self.name);
        while lk.locked {
            lk = sleep(lk);
        }
        lk.locked = true;
        lk.tid = me;
        SleepLockGuard { sleep_lock: self }
    }

    pub fn holding(&self) -> bool {
        let lk = self.lk.lock();
        lk.locked && lk.tid == mytid()
    }

    pub fn unlock(guard: SleepLockGuard<'_, T>) -> &'_ SleepLock<T> {
        guard.sleep_lock()
    }
}

impl<'a, T: 'a> SleepLockGuard<'a, T> {
    // Returns a reference to the original 'SleepLock' object.
    pub fn sleep_lock(&self) -> &'a SleepLock<T> {
        self.sleep_lock
    }

    pub fn holding(&self) -> bool {
        self.sleep_lock.holding()
    }
}

impl<'a, T: 'a> Deref for SleepLockGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        unsafe { &*self.sleep_lock.data.get() }
    }
}

impl<'a, T: 'a> DerefMut for SleepLockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.sleep_lock.data.get() }
    }
}

impl<'a, T: 'a> Drop for SleepLockGuard<'a, T> {
    fn drop(&mut self) {
        let mut lk = self.sleep_lock.lk.lock();
        assert!(
            lk.locked && lk.tid == mytid(),
            "release {}",
            self.sleep_lock.name
        );
        lk.locked = false;
        lk.tid = 0;
        wakeup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn exclusive_across_threads() {
        let lock = Arc::new(SleepLock::new(Vec::new(), "vec"));
        let handles: Vec<_> = (0..4)
            .map(|n| {
                let lock = Arc::clone(&lock);
                thread::spawn(move || {
                    for i in 0..100 {
                        let mut guard = lock.lock();
                        let len = guard.len();
                        thread::yield_now();
                        guard.push((n, i));
                        assert_eq!(guard.len(), len + 1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(lock.lock().len(), 400);
    }

    #[test]
    fn holding_tracks_owner() {
        let lock = SleepLock::new(0, "owner");
        assert!(!lock.holding());
        let guard = lock.lock();
        assert!(guard.holding());
        let lock = SleepLock::unlock(guard);
        assert!(!lock.holding());
    }
}
