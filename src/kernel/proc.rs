use crate::array;
use crate::file::File;
use crate::fs::Inode;
use crate::param::NOFILE;
use crate::spinlock::{Mutex, MutexGuard};
use crate::start::Kernel;
use crate::vm::Uvm;
use std::cell::Cell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, PoisonError};

// Every host thread plays the part of one CPU running one process.
// Lock holders are recorded by this id; 0 means "nobody".
static NEXT_TID: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    static TID: Cell<usize> = const { Cell::new(0) };
}

pub fn mytid() -> usize {
    TID.with(|tid| {
        if tid.get() == 0 {
            tid.set(NEXT_TID.fetch_add(1, Ordering::Relaxed));
        }
        tid.get()
    })
}

// Sleepers wait for the wakeup generation to move on.
static WAIT: std::sync::Mutex<u64> = std::sync::Mutex::new(0);
static WAKE: Condvar = Condvar::new();

// Atomically release the spin lock and sleep until a wakeup().
// Reacquires the lock when awakened.
// Callers loop on their condition, so spurious wakeups are harmless.
pub fn sleep<T>(mutex_guard: MutexGuard<'_, T>) -> MutexGuard<'_, T> {
    // Once we hold WAIT, we can be guaranteed that we won't miss
    // any wakeup (wakeup() takes WAIT), so it's okay to release
    // the spin lock.
    let mut gen = WAIT.lock().unwrap_or_else(PoisonError::into_inner);
    let mutex = Mutex::unlock(mutex_guard);
    let start = *gen;
    while *gen == start {
        gen = WAKE.wait(gen).unwrap_or_else(PoisonError::into_inner);
    }
    drop(gen);
    mutex.lock()
}

// Wake up every sleeper.
pub fn wakeup() {
    let mut gen = WAIT.lock().unwrap_or_else(PoisonError::into_inner);
    *gen = gen.wrapping_add(1);
    WAKE.notify_all();
}

// User registers saved on entry to the kernel.
// Arguments arrive in a0..a5 and the system call number in a7;
// the result goes back in a0.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Trapframe {
    pub epc: usize, // saved user program counter
    pub sp: usize,
    pub a0: usize,
    pub a1: usize,
    pub a2: usize,
    pub a3: usize,
    pub a4: usize,
    pub a5: usize,
    pub a7: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PId(usize);

impl PId {
    pub fn new(pid: usize) -> Self {
        Self(pid)
    }
}

// Per-process state
#[derive(Debug)]
pub struct Proc {
    pid: PId,
    kernel: Arc<Kernel>,
    data: ProcData,
}

#[derive(Debug)]
pub struct ProcData {
    pub uvm: Uvm,                      // User memory
    pub trapframe: Trapframe,          // saved user registers
    pub name: String,                  // Process name (debugging)
    pub ofile: [Option<File>; NOFILE], // Open files
    pub cwd: Option<Inode>,            // Current directory
}

impl Proc {
    pub fn new(pid: PId, kernel: Arc<Kernel>, name: &str, uvm: Uvm, cwd: Inode) -> Self {
        Self {
            pid,
            kernel,
            data: ProcData {
                uvm,
                trapframe: Trapframe::default(),
                name: name.into(),
                ofile: array![None; NOFILE],
                cwd: Some(cwd),
            },
        }
    }

    pub fn pid(&self) -> usize {
        self.pid.0
    }

    pub fn kernel(&self) -> &Arc<Kernel> {
        &self.kernel
    }

    pub fn data(&self) -> &ProcData {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut ProcData {
        &mut self.data
    }
}

impl ProcData {
    pub fn cwd(&self) -> &Inode {
        self.cwd
            .as_ref()
            .unwrap_or_else(|| panic!("{}: no cwd", self.name))
    }
}

// Release everything the process holds, as exit() does.
impl Drop for Proc {
    fn drop(&mut self) {
        // Close all open files
        for fd in self.data.ofile.iter_mut() {
            let _file = fd.take();
        }

        let fs = Arc::clone(self.kernel.fs());
        let _op = fs.begin_op();
        self.data.cwd.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn tid_is_per_thread() {
        let me = mytid();
        assert_ne!(me, 0);
        assert_eq!(mytid(), me);
        let other = thread::spawn(mytid).join().unwrap();
        assert_ne!(other, me);
    }

    #[test]
    fn sleep_releases_lock_until_wakeup() {
        let flag = Arc::new(Mutex::new(false, "flag"));
        let waiter = {
            let flag = Arc::clone(&flag);
            thread::spawn(move || {
                let mut guard = flag.lock();
                while !*guard {
                    guard = sleep(guard);
                }
            })
        };
        thread::yield_now();
        *flag.lock() = true;
        wakeup();
        waiter.join().unwrap();
    }
}
