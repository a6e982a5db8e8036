use crate::array;
use crate::error::{Error::*, Result};
use crate::fcntl::OMode;
use crate::fs::{create, IData, Inode, Path, BSIZE};
use crate::param::{MAXOPBLOCKS, NDEV, NFILE};
use crate::pipe::Pipe;
use crate::sleeplock::{SleepLock, SleepLockGuard};
use crate::spinlock::Mutex;
use crate::stat::{FileType, Stat};
use core::cell::UnsafeCell;
use core::fmt;
use core::ops::Deref;
use std::sync::Arc;

// System-wide table of open file descriptions.
#[derive(Debug)]
pub struct FTable {
    files: Mutex<[Option<Arc<VFile>>; NFILE]>,
    devsw: Arc<DevSW>,
}

// A reference to an open file description, as held in a
// process's descriptor table. Cloning is dup().
#[derive(Clone, Debug)]
pub struct File {
    f: Option<Arc<VFile>>,
    table: Arc<FTable>,
    readable: bool,
    writable: bool,
}

#[derive(Debug)]
pub enum VFile {
    Device(DNod),
    Inode(FNod),
    Pipe(Pipe),
}

// Device Node
#[derive(Debug)]
pub struct DNod {
    driver: Arc<dyn Device>,
    ip: Inode,
}

// Device functions, map this trait using dyn
pub trait Device: Send + Sync {
    fn read(&self, dst: &mut [u8]) -> Result<usize>;
    fn write(&self, src: &[u8]) -> Result<usize>;
    fn major(&self) -> Major;
}

impl fmt::Debug for dyn Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Device fn {:?}", self.major())
    }
}

impl Deref for DNod {
    type Target = dyn Device;
    fn deref(&self) -> &Self::Target {
        &*self.driver
    }
}

// File & directory Node
#[derive(Debug)]
pub struct FNod {
    off: UnsafeCell<u32>, // Safety: only touched while the inode is locked.
    ip: Inode,
}
unsafe impl Send for FNod {}
unsafe impl Sync for FNod {}

impl FNod {
    pub fn new(ip: Inode, offset: u32) -> Self {
        Self {
            off: UnsafeCell::new(offset),
            ip,
        }
    }

    fn read(&self, dst: &mut [u8]) -> Result<usize> {
        let ip = self.ip.lock();
        let off = unsafe { &mut *self.off.get() };

        let r = ip.read(*off, dst)?;
        *off += r as u32;
        Ok(r)
    }

    fn write(&self, src: &[u8]) -> Result<usize> {
        // write a few blocks at a time to avoid exceeding the maximum
        // log transaction size, including i-node, indirect block,
        // allocation blocks, and 2 blocks of slop for non-aligned
        // writes.
        let max = ((MAXOPBLOCKS - 1 - 1 - 2) / 2) * BSIZE;
        let mut i = 0;

        while i < src.len() {
            let n1 = core::cmp::min(src.len() - i, max);

            let _op = self.ip.fs().begin_op();
            let mut guard = self.ip.lock();
            let off = unsafe { &mut *self.off.get() };
            match guard.write(*off, &src[i..i + n1]) {
                Ok(r) => {
                    *off += r as u32;
                    i += r;
                    if r != n1 {
                        // disk full
                        break;
                    }
                }
                Err(err) if i == 0 => return Err(err),
                Err(_) => break,
            }
        }
        Ok(i)
    }
}

impl VFile {
    fn read(&self, dst: &mut [u8]) -> Result<usize> {
        match self {
            VFile::Device(d) => d.read(dst),
            VFile::Inode(f) => f.read(dst),
            VFile::Pipe(p) => p.read(dst),
        }
    }

    fn write(&self, src: &[u8]) -> Result<usize> {
        match self {
            VFile::Device(d) => d.write(src),
            VFile::Inode(f) => f.write(src),
            VFile::Pipe(p) => p.write(src),
        }
    }

    // Get metadata about file.
    pub fn stat(&self) -> Result<Stat> {
        match self {
            VFile::Device(DNod { ref ip, .. }) | VFile::Inode(FNod { ref ip, .. }) => {
                Ok(ip.lock().stat())
            }
            VFile::Pipe(_) => Err(BadFileDescriptor),
        }
    }

}

impl File {
    // Read from file.
    pub fn read(&mut self, dst: &mut [u8]) -> Result<usize> {
        if !self.readable {
            return Err(InvalidArgument);
        }
        self.read_inner(dst)
    }

    // Write to file.
    pub fn write(&mut self, src: &[u8]) -> Result<usize> {
        if !self.writable {
            return Err(InvalidArgument);
        }
        self.write_inner(src)
    }

    fn read_inner(&self, dst: &mut [u8]) -> Result<usize> {
        self.f.as_ref().ok_or(BadFileDescriptor)?.read(dst)
    }

    fn write_inner(&self, src: &[u8]) -> Result<usize> {
        self.f.as_ref().ok_or(BadFileDescriptor)?.write(src)
    }

    pub fn is_readable(&self) -> bool {
        self.readable
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    // Do both handles refer to the same open file description?
    pub fn same(&self, other: &File) -> bool {
        matches!((&self.f, &other.f), (Some(a), Some(b)) if Arc::ptr_eq(a, b))
    }
}

impl Deref for File {
    type Target = VFile;
    fn deref(&self) -> &Self::Target {
        self.f
            .as_ref()
            .unwrap_or_else(|| panic!("file already closed"))
    }
}

impl Drop for File {
    fn drop(&mut self) {
        let Some(f) = self.f.take() else {
            return;
        };
        if Arc::strong_count(&f) < 2 {
            panic!("file drop");
        }

        // The table's copy and ours: this was the last reference.
        let last = {
            let mut guard = self.table.files.lock();
            if Arc::strong_count(&f) == 2 {
                for ff in guard.iter_mut() {
                    if matches!(ff, Some(vff) if Arc::ptr_eq(&f, vff)) {
                        ff.take(); // drop ref in table. ref count = 1;
                    }
                }
                Some(f)
            } else {
                drop(f);
                None
            }
        };

        match last.map(Arc::try_unwrap) {
            Some(Ok(VFile::Inode(FNod { ip, .. }) | VFile::Device(DNod { ip, .. }))) => {
                let fs = Arc::clone(ip.fs());
                let _op = fs.begin_op();
                drop(ip);
            }
            // dropping the pipe end closes it.
            Some(Ok(VFile::Pipe(_))) | None => (),
            Some(Err(_)) => panic!("file drop: still shared"),
        }
    }
}

// File Allocation Type Source
pub enum FType<'a> {
    Node(&'a Path, &'a Inode),
    Pipe(Pipe),
}

impl FTable {
    pub fn new(devsw: Arc<DevSW>) -> Self {
        Self {
            files: Mutex::new(array![None; NFILE], "ftable"),
            devsw,
        }
    }

    pub fn devsw(&self) -> &Arc<DevSW> {
        &self.devsw
    }

    // Number of open file descriptions.
    pub fn in_use(&self) -> usize {
        self.files.lock().iter().filter(|f| f.is_some()).count()
    }

    // Allocate a file structure.
    // A Node path is resolved relative to the given directory.
    // Must be called inside a transaction if ftype is FType::Node.
    pub fn alloc(self: &Arc<Self>, opts: OMode, ftype: FType<'_>) -> Result<File> {
        let inner: Arc<VFile> = Arc::new(match ftype {
            FType::Node(path, cwd) => {
                let ip: Inode;
                let mut ip_guard: SleepLockGuard<'_, IData>;

                if opts.is_create() {
                    ip = create(path, cwd, FileType::File, 0, 0)?;
                    ip_guard = ip.lock();
                } else {
                    (_, ip) = path.namei(cwd)?;
                    ip_guard = ip.lock();
                    if ip_guard.itype() == FileType::Dir && !opts.is_rdonly() {
                        return Err(IsADirectory);
                    }
                }

                match ip_guard.itype() {
                    FileType::Device => {
                        let driver = self.devsw.get(Major::from_u16(ip_guard.major()));
                        SleepLock::unlock(ip_guard);
                        VFile::Device(DNod {
                            driver: driver.ok_or(NoSuchNode)?,
                            ip,
                        })
                    }
                    FileType::Dir | FileType::File => {
                        let mut offset = 0;
                        if opts.is_trunc() && ip_guard.itype() == FileType::File {
                            ip_guard.trunc();
                        } else if opts.is_append() && ip_guard.itype() == FileType::File {
                            offset = ip_guard.size();
                        }
                        SleepLock::unlock(ip_guard);
                        VFile::Inode(FNod::new(ip, offset))
                    }
                    FileType::Empty => return Err(NoSuchNode),
                }
            }
            FType::Pipe(pi) => VFile::Pipe(pi),
        });

        let mut guard = self.files.lock();
        let f = guard
            .iter_mut()
            .find(|f| f.is_none())
            .ok_or(FileTableOverflow)?;
        f.replace(Arc::clone(&inner)); // ref count = 2
        Ok(File {
            f: Some(inner),
            table: Arc::clone(self),
            readable: opts.is_read(),
            writable: opts.is_write(),
        })
    }
}

// Device switch: drivers indexed by major number.
pub struct DevSW {
    table: Mutex<[Option<Arc<dyn Device>>; NDEV]>,
}

impl fmt::Debug for DevSW {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.table.lock().iter()).finish()
    }
}

impl Default for DevSW {
    fn default() -> Self {
        Self::new()
    }
}

impl DevSW {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(array![None; NDEV], "devsw"),
        }
    }

    pub fn set(&self, devnum: Major, dev: Arc<dyn Device>) -> Result<()> {
        let mut table = self.table.lock();
        let slot = table.get_mut(devnum as usize).ok_or(NoSuchNode)?;
        if slot.is_some() {
            return Err(AlreadyExists);
        }
        slot.replace(dev);
        Ok(())
    }

    pub fn get(&self, devnum: Major) -> Option<Arc<dyn Device>> {
        self.table.lock().get(devnum as usize)?.clone()
    }
}

// Device Major Number
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Major {
    Null = 0,
    Console = 1,
    #[default]
    Invalid,
}

impl Major {
    pub fn from_u16(bits: u16) -> Major {
        match bits {
            0 => Major::Null,
            1 => Major::Console,
            _ => Major::Invalid,
        }
    }
}
