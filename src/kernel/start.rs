use crate::{
    console::Console,
    error::Result,
    file::{DevSW, Device, FTable, Major},
    fs::FileSystem,
    null::Null,
    param::{FSSIZE, NINODES, ROOTDEV, USERSZ},
    proc::{PId, Proc},
    ramdisk::RamDisk,
    vm::Uvm,
};
use core::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// Everything a booted kernel owns: the root file system,
// the open file table (with its device switch) and the console.
#[derive(Debug)]
pub struct Kernel {
    fs: Arc<FileSystem>,
    ftable: Arc<FTable>,
    console: Arc<Console>,
    next_pid: AtomicUsize,
}

impl Kernel {
    pub fn boot() -> Arc<Self> {
        Self::boot_with(FSSIZE as u32, NINODES as u32)
    }

    // Boot on a freshly formatted ram disk of the given geometry.
    pub fn boot_with(size: u32, ninodes: u32) -> Arc<Self> {
        let disk = Arc::new(RamDisk::mkfs(size, ninodes)); // emulated hard disk
        let fs = FileSystem::new(ROOTDEV, disk); // transaction log and inode table

        let devsw = Arc::new(DevSW::new());
        let console = Arc::new(Console::new());
        let drivers: [(Major, Arc<dyn Device>); 2] = [
            (Major::Null, Arc::new(Null)), // null device init
            (Major::Console, Arc::clone(&console) as Arc<dyn Device>), // console init
        ];
        for (major, driver) in drivers {
            if let Err(err) = devsw.set(major, driver) {
                panic!("devsw: {:?}: {}", major, err);
            }
        }

        log::debug!("kernel is booting: {} blocks, {} inodes", size, ninodes);
        Arc::new(Self {
            fs,
            ftable: Arc::new(FTable::new(devsw)),
            console,
            next_pid: AtomicUsize::new(1),
        })
    }

    pub fn fs(&self) -> &Arc<FileSystem> {
        &self.fs
    }

    pub fn ftable(&self) -> &Arc<FTable> {
        &self.ftable
    }

    pub fn console(&self) -> &Arc<Console> {
        &self.console
    }

    pub fn devsw(&self) -> &Arc<DevSW> {
        self.ftable.devsw()
    }

    // Set up a process with empty user memory, running in "/".
    pub fn userinit(self: &Arc<Self>, name: &str) -> Result<Proc> {
        let pid = PId::new(self.next_pid.fetch_add(1, Ordering::Relaxed));
        let cwd = self.fs.root()?;
        Ok(Proc::new(pid, Arc::clone(self), name, Uvm::new(USERSZ), cwd))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error::AlreadyExists;

    #[test]
    fn boot_registers_devices() {
        let kernel = Kernel::boot();
        assert!(kernel.devsw().get(Major::Null).is_some());
        assert!(kernel.devsw().get(Major::Console).is_some());
        assert!(kernel.devsw().get(Major::Invalid).is_none());
        assert_eq!(
            kernel.devsw().set(Major::Null, Arc::new(Null)).err(),
            Some(AlreadyExists)
        );
    }

    #[test]
    fn processes_start_in_root() {
        let kernel = Kernel::boot_with(256, 32);
        let p = kernel.userinit("init").unwrap();
        let q = kernel.userinit("sh").unwrap();
        assert_ne!(p.pid(), q.pid());
        assert_eq!(p.data().cwd().inum(), crate::fs::ROOTINO);
        assert_eq!(p.data().uvm.size(), USERSZ);
        assert_eq!(kernel.fs().active_inodes(), 1);
        drop((p, q));
        assert_eq!(kernel.fs().active_inodes(), 0);
    }
}
