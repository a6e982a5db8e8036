use crate::array;
use crate::error::{Error::*, Result};
use crate::log::{Log, LogOp};
use crate::param::NINODE;
use crate::ramdisk::{Block, RamDisk};
use crate::sleeplock::{SleepLock, SleepLockGuard};
use crate::spinlock::Mutex;
use crate::stat::{FileType, Stat};
use core::fmt;
use core::mem::size_of;
use core::ops::Deref;
use std::sync::Arc;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

// File system implementation. Four layers:
//   - Blocks: allocator for raw disk blocks.
//   - Files: inode allocator, reading, writing, metadata.
//   - Directories: inode with special contents (list of other inodes!)
//   - Names: paths like /usr/bin/sh for convenient naming.
// Grouping of block writes into transactions lives in log.rs.
//
// This file contains the low-level file system manipulation
// routines. The (higher-level) system call implementations
// are in syscall.rs

pub const ROOTINO: u32 = 1; // root i-number
pub const BSIZE: usize = 1024; // block size

// Disk layout:
// [ boot block | super block | inode blocks | free bit map | data blocks ]
//
// mkfs computes the super block and builds an initial file system. The
// super block describes the disk layout:
#[repr(C)]
#[derive(Debug, Clone, Copy, AsBytes, FromZeroes, FromBytes)]
pub struct SuperBlock {
    pub magic: u32,      // Must be FSMAGIC
    pub size: u32,       // Size of file system image (blocks)
    pub nblocks: u32,    // Number of data blocks
    pub ninodes: u32,    // Number of inodes.
    pub inodestart: u32, // Block number of first inode block
    pub bmapstart: u32,  // Block number of first free map block
}

pub const FSMAGIC: u32 = 0x10203040;

pub const NDIRECT: usize = 12;
pub const NINDIRECT: usize = BSIZE / size_of::<u32>();
pub const MAXFILE: usize = NDIRECT + NINDIRECT;

// On-disk inode structure
#[repr(C)]
#[derive(Debug, Clone, Copy, AsBytes, FromZeroes, FromBytes)]
pub struct DInode {
    pub itype: u16,                // File type
    pub major: u16,                // Major device number (T_DEVICE only)
    pub minor: u16,                // Minor device number (T_DEVICE only)
    pub nlink: u16,                // Number of links to inode in file system
    pub size: u32,                 // Size of file (bytes)
    pub addrs: [u32; NDIRECT + 1], // Data block addresses
}

// Inodes per block.
pub const IPB: usize = BSIZE / size_of::<DInode>();

// Bitmap bits per block
pub const BPB: u32 = (BSIZE * 8) as u32;

// Directory is a file containing a sequence of dirent structures.
pub const DIRSIZ: usize = 14;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, AsBytes, FromZeroes, FromBytes)]
pub struct DirEnt {
    pub inum: u16,
    pub name: [u8; DIRSIZ],
}

impl DirEnt {
    pub fn new(name: &str, inum: u32) -> Self {
        let mut de = Self {
            inum: inum as u16,
            name: [0; DIRSIZ],
        };
        let len = core::cmp::min(name.len(), DIRSIZ);
        de.name[..len].copy_from_slice(&name.as_bytes()[..len]);
        de
    }

    pub fn name(&self) -> &[u8] {
        let len = self.name.iter().position(|&c| c == 0).unwrap_or(DIRSIZ);
        &self.name[..len]
    }
}

impl SuperBlock {
    // Block containing inode i
    pub fn iblock(&self, i: u32) -> u32 {
        i / IPB as u32 + self.inodestart
    }

    // Block of free map containing bit for block b
    pub fn bblock(&self, b: u32) -> u32 {
        b / BPB + self.bmapstart
    }
}

// Byte range of inode inum inside its inode block.
fn dinode_range(inum: u32) -> core::ops::Range<usize> {
    let off = (inum as usize % IPB) * size_of::<DInode>();
    off..off + size_of::<DInode>()
}

fn block_entry(bp: &Block, i: usize) -> u32 {
    let off = i * size_of::<u32>();
    u32::from_ne_bytes([bp[off], bp[off + 1], bp[off + 2], bp[off + 3]])
}

fn set_block_entry(bp: &mut Block, i: usize, addr: u32) {
    let off = i * size_of::<u32>();
    bp[off..off + size_of::<u32>()].copy_from_slice(&addr.to_ne_bytes());
}

// Blocks.

// Zero a block.
fn bzero(log: &Log, bno: u32) {
    log.modify(bno, |bp| bp.fill(0));
}

// Allocate a zeroed disk block.
fn balloc(log: &Log) -> Result<u32> {
    let sb = *log.sb();
    for b in (0..sb.size).step_by(BPB as usize) {
        let nbits = core::cmp::min(BPB, sb.size - b);
        let free = |bp: &Block| (0..nbits).find(|bi| bp[(bi / 8) as usize] & (1 << (bi % 8)) == 0);
        if log.read_with(sb.bblock(b), free).is_none() {
            continue;
        }
        // Is block still free? Mark it in use.
        let got = log.modify(sb.bblock(b), |bp| {
            let bi = free(&*bp)?;
            bp[(bi / 8) as usize] |= 1 << (bi % 8);
            Some(bi)
        });
        if let Some(bi) = got {
            bzero(log, b + bi);
            return Ok(b + bi);
        }
    }
    log::warn!("balloc: out of blocks");
    Err(StorageFull)
}

// Free a disk block.
fn bfree(log: &Log, b: u32) {
    let sb = log.sb();
    let bi = b % BPB;
    let m = 1 << (bi % 8);
    log.modify(sb.bblock(b), |bp| {
        if bp[(bi / 8) as usize] & m == 0 {
            panic!("freeing free block");
        }
        bp[(bi / 8) as usize] &= !m;
    });
}

// Inodes.
//
// An inode describes a single unnamed file.
// The inode disk structure holds metadata: the file's type,
// its size, the number of links referring to it, and the
// list of blocks holding the file's content.
//
// The inodes are laid out sequentially on disk at sb.inodestart.
// Each inode has a number, indicating its position on the disk.
//
// The file system keeps a table of in-use inodes in memory
// to provide a place for synchronizing access to inodes used by
// multiple processes. The in-memory inodes (Arc<MInode>) include
// book-keeping information that is not stored on disk: the Arc
// count and data.valid.
//
// * Allocation: an inode is allocated if its type (on disk) is
//   non-zero. FileSystem::alloc() allocates, and put() frees if the
//   Arc count and the link count have fallen to zero.
//
// * Referencing in table: an entry in the inode table is free once
//   Arc::strong_count() has fallen to 2 (the table's own copy and the
//   one being released). Otherwise the Arc count tracks the number of
//   Inode handles (open files and current directories). get() finds
//   or creates a table entry; dropping an Inode calls put().
//
// * Valid: the information (type, size, &c) in an inode table entry
//   is only correct when data.valid is true. MInode::lock() reads the
//   inode from the disk and sets valid, while put() clears valid if
//   the inode is freed.
//
// * Locked: file system code may only examine and modify the
//   information in an inode and its content if it has first locked
//   the inode.
//
// Thus a typical sequence is:
//   ip = fs.get(inum)?;
//   guard = ip.lock();
//   ... examine and modify guard.xxx ...
//   drop(guard);
//   drop(ip);
//
// Inodes are released inside a transaction, since the last
// release of an unlinked inode frees it on disk.

pub struct FileSystem {
    dev: u32,
    log: Arc<Log>,
    itable: Mutex<[Option<Arc<MInode>>; NINODE]>,
}

impl fmt::Debug for FileSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSystem").field("dev", &self.dev).finish()
    }
}

// Inode handed out by the inode table.
// Wrapper for in-memory inode i.e. MInode
#[derive(Clone)]
pub struct Inode {
    ip: Option<Arc<MInode>>,
    fs: Arc<FileSystem>,
}

// in-memory copy of an inode
#[derive(Debug)]
pub struct MInode {
    dev: u32,
    inum: u32,
    data: SleepLock<IData>,
}

#[derive(Debug)]
pub struct IData {
    log: Arc<Log>,
    dev: u32,
    inum: u32,
    valid: bool,
    itype: FileType,
    major: u16,
    minor: u16,
    nlink: u16,
    size: u32,
    addrs: [u32; NDIRECT + 1],
}

#[derive(Debug, Clone, Copy)]
pub enum LinkOp {
    Plus,
    Minus,
    Init(u16),
}

impl IData {
    fn new(log: Arc<Log>, dev: u32, inum: u32) -> Self {
        Self {
            log,
            dev,
            inum,
            valid: false,
            itype: FileType::Empty,
            major: 0,
            minor: 0,
            nlink: 0,
            size: 0,
            addrs: [0; NDIRECT + 1],
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn itype(&self) -> FileType {
        self.itype
    }

    pub fn major(&self) -> u16 {
        self.major
    }

    pub fn nlink(&self) -> u16 {
        self.nlink
    }

    pub fn inum(&self) -> u32 {
        self.inum
    }

    // inode is write through, so every change is also written to disk.
    fn set_type(&mut self, itype: FileType) {
        self.itype = itype;
        self.update();
    }

    pub fn set_major_minor(&mut self, major: u16, minor: u16) {
        self.major = major;
        self.minor = minor;
        self.update();
    }

    fn set_size(&mut self, size: u32) {
        self.size = size;
        self.update();
    }

    fn set_addrs(&mut self, bn: usize, addr: u32) {
        self.addrs[bn] = addr;
        self.update();
    }

    // The link count never goes below zero.
    pub fn set_nlink(&mut self, op: LinkOp) -> Result<()> {
        match op {
            LinkOp::Plus => self.nlink = self.nlink.checked_add(1).ok_or(TooManyLinks)?,
            LinkOp::Minus => {
                self.nlink = self
                    .nlink
                    .checked_sub(1)
                    .unwrap_or_else(|| panic!("inode {}: nlink underflow", self.inum))
            }
            LinkOp::Init(num) => self.nlink = num,
        }
        self.update();
        Ok(())
    }

    // Copy a modified in-memory inode to disk.
    // Must be called after every change to an inode field
    // that lives on disk.
    // Caller must hold inode sleeplock and be inside a transaction.
    pub fn update(&self) {
        let sb = self.log.sb();
        let mut dip = DInode::new_zeroed();
        dip.itype = self.itype as u16;
        dip.major = self.major;
        dip.minor = self.minor;
        dip.nlink = self.nlink;
        dip.size = self.size;
        dip.addrs.copy_from_slice(&self.addrs);
        self.log.modify(sb.iblock(self.inum), |bp| {
            bp[dinode_range(self.inum)].copy_from_slice(dip.as_bytes())
        });
    }

    // Truncate inode (discard contents).
    // Caller must hold inode sleeplock.
    pub fn trunc(&mut self) {
        for addr in self.addrs.iter_mut().take(NDIRECT) {
            if *addr > 0 {
                bfree(&self.log, *addr);
                *addr = 0;
            }
        }

        let ind = self.addrs[NDIRECT];
        if ind > 0 {
            let addrs: Vec<u32> = self
                .log
                .read_with(ind, |bp| (0..NINDIRECT).map(|i| block_entry(bp, i)).collect());
            for addr in addrs.into_iter().filter(|&a| a > 0) {
                bfree(&self.log, addr);
            }
            bfree(&self.log, ind);
            self.addrs[NDIRECT] = 0;
        }

        self.size = 0;
        self.update();
    }

    // Inode content
    //
    // The content (data) associated with each inode is stored
    // in blocks on the disk. The first NDIRECT block numbers
    // are listed in addrs[]. The next NINDIRECT blocks are
    // listed in block addrs[NDIRECT].

    // Return the disk block address of the nth block,
    // allocating one if there is no such block.
    pub fn bmap(&mut self, bn: u32) -> Result<u32> {
        let mut bn = bn as usize;

        if bn < NDIRECT {
            let mut addr = self.addrs[bn];
            if addr == 0 {
                addr = balloc(&self.log)?;
                self.set_addrs(bn, addr);
            }
            return Ok(addr);
        }
        bn -= NDIRECT;

        if bn < NINDIRECT {
            // Load indirect block, allocating if necessary.
            let mut ind = self.addrs[NDIRECT];
            if ind == 0 {
                ind = balloc(&self.log)?;
                self.set_addrs(NDIRECT, ind);
            }
            let mut addr = self.log.read_with(ind, |bp| block_entry(bp, bn));
            if addr == 0 {
                addr = balloc(&self.log)?;
                self.log.modify(ind, |bp| set_block_entry(bp, bn, addr));
            }
            return Ok(addr);
        }

        Err(FileTooLarge)
    }

    // Like bmap() but never allocates; reading a hole is an error.
    fn block_addr(&self, bn: u32) -> Result<u32> {
        let bn = bn as usize;
        let addr = if bn < NDIRECT {
            self.addrs[bn]
        } else if bn < MAXFILE && self.addrs[NDIRECT] != 0 {
            self.log
                .read_with(self.addrs[NDIRECT], |bp| block_entry(bp, bn - NDIRECT))
        } else {
            0
        };
        match addr {
            0 => Err(NotFound),
            addr => Ok(addr),
        }
    }

    // Copy stat information from inode.
    // Caller must hold sleeplock.
    pub fn stat(&self) -> Stat {
        Stat {
            dev: self.dev,
            ino: self.inum,
            ftype: self.itype,
            nlink: self.nlink,
            size: self.size,
        }
    }

    // Read data from inode.
    // Caller must hold sleeplock.
    pub fn read(&self, off: u32, dst: &mut [u8]) -> Result<usize> {
        let mut tot = 0;
        let mut off = off as usize;

        if off > self.size as usize {
            return Ok(0);
        }
        let n = core::cmp::min(dst.len(), self.size as usize - off);

        while tot < n {
            let addr = self.block_addr((off / BSIZE) as u32)?;
            let m = core::cmp::min(n - tot, BSIZE - off % BSIZE);
            let from = off % BSIZE;
            self.log.read_with(addr, |bp| {
                dst[tot..tot + m].copy_from_slice(&bp[from..from + m])
            });
            tot += m;
            off += m;
        }
        Ok(tot)
    }

    // Write data to inode.
    // Caller must hold sleeplock and be inside a transaction.
    // Returns the number of bytes successfully written.
    // If the return value is less than src.len(), the disk filled up.
    pub fn write(&mut self, off: u32, src: &[u8]) -> Result<usize> {
        let mut tot = 0;
        let mut off = off as usize;
        let n = src.len();

        if off > self.size as usize || off + n > MAXFILE * BSIZE {
            return Err(FileTooLarge);
        }

        while tot < n {
            let addr = match self.bmap((off / BSIZE) as u32) {
                Ok(addr) => addr,
                Err(err) if tot == 0 => return Err(err),
                Err(_) => break,
            };
            let m = core::cmp::min(n - tot, BSIZE - off % BSIZE);
            let to = off % BSIZE;
            self.log.modify(addr, |bp| {
                bp[to..to + m].copy_from_slice(&src[tot..tot + m])
            });
            tot += m;
            off += m;
        }

        if off > self.size as usize {
            self.set_size(off as u32);
        }

        Ok(tot)
    }

    // Directories

    fn read_dirent(&self, off: u32) -> DirEnt {
        let mut de = DirEnt::default();
        match self.read(off, de.as_bytes_mut()) {
            Ok(n) if n == size_of::<DirEnt>() => de,
            _ => panic!("dirent read: inode {} off {}", self.inum, off),
        }
    }

    // Overwrite the directory entry at byte offset off.
    pub fn write_dirent(&mut self, off: u32, de: &DirEnt) -> Result<()> {
        match self.write(off, de.as_bytes())? {
            n if n == size_of::<DirEnt>() => Ok(()),
            _ => Err(StorageFull),
        }
    }

    // Look for a directory entry in a directory.
    // Returns the inode number and the byte offset of the entry.
    pub fn dirlookup(&self, name: &str) -> Result<(u32, u32)> {
        if self.itype != FileType::Dir {
            return Err(NotADirectory);
        }

        for off in (0..self.size).step_by(size_of::<DirEnt>()) {
            let de = self.read_dirent(off);
            if de.inum != 0 && de.name() == name.as_bytes() {
                // entry matches path element
                return Ok((de.inum as u32, off));
            }
        }
        Err(NotFound)
    }

    // Write a new directory entry (name, inum) into the directory.
    pub fn dirlink(&mut self, name: &str, inum: u32) -> Result<()> {
        if name.len() > DIRSIZ {
            return Err(InvalidArgument);
        }
        // check that name is not present.
        match self.dirlookup(name) {
            Ok(_) => return Err(AlreadyExists),
            Err(NotFound) => (),
            Err(err) => return Err(err),
        }

        // Look for an empty dirent; append if there is none.
        let off = (0..self.size)
            .step_by(size_of::<DirEnt>())
            .find(|&off| self.read_dirent(off).inum == 0)
            .unwrap_or(self.size);

        self.write_dirent(off, &DirEnt::new(name, inum))
    }

    // Is the directory empty except for "." and ".." ?
    pub fn is_dir_empty(&self) -> bool {
        ((2 * size_of::<DirEnt>() as u32)..self.size)
            .step_by(size_of::<DirEnt>())
            .all(|off| self.read_dirent(off).inum == 0)
    }
}

impl MInode {
    fn new(log: Arc<Log>, dev: u32, inum: u32) -> Self {
        Self {
            dev,
            inum,
            data: SleepLock::new(IData::new(log, dev, inum), "inode"),
        }
    }

    pub fn dev(&self) -> u32 {
        self.dev
    }

    pub fn inum(&self) -> u32 {
        self.inum
    }

    // Lock the inode.
    // Reads the inode from disk if necessary.
    // Unlocking is dropping the guard.
    pub fn lock(&self) -> SleepLockGuard<'_, IData> {
        let mut guard = self.data.lock();
        if !guard.valid {
            let log = Arc::clone(&guard.log);
            let dip = log.read_with(log.sb().iblock(self.inum), |bp| {
                DInode::read_from(&bp[dinode_range(self.inum)])
            });
            let dip = dip.unwrap_or_else(|| panic!("ilock: short inode {}", self.inum));
            guard.itype = FileType::from_u16(dip.itype);
            guard.major = dip.major;
            guard.minor = dip.minor;
            guard.nlink = dip.nlink;
            guard.size = dip.size;
            guard.addrs.copy_from_slice(&dip.addrs);
            guard.valid = true;
            if guard.itype == FileType::Empty {
                panic!("ilock: no type");
            }
        }
        guard
    }
}

impl Inode {
    fn new(ip: Arc<MInode>, fs: Arc<FileSystem>) -> Self {
        Self { ip: Some(ip), fs }
    }

    // Return another handle to the same in-memory inode,
    // for the ip = ip1.dup() idiom.
    pub fn dup(&self) -> Self {
        self.clone()
    }

    pub fn fs(&self) -> &Arc<FileSystem> {
        &self.fs
    }
}

impl fmt::Debug for Inode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inode")
            .field("dev", &self.dev)
            .field("inum", &self.inum)
            .finish()
    }
}

impl Drop for Inode {
    fn drop(&mut self) {
        if let Some(ip) = self.ip.take() {
            self.fs.put(ip);
        }
    }
}

impl Deref for Inode {
    type Target = MInode;
    fn deref(&self) -> &Self::Target {
        self.ip
            .as_ref()
            .unwrap_or_else(|| panic!("inode already released"))
    }
}

impl FileSystem {
    pub fn new(dev: u32, disk: Arc<RamDisk>) -> Arc<Self> {
        Arc::new(Self {
            dev,
            log: Arc::new(Log::new(dev, disk)),
            itable: Mutex::new(array![None; NINODE], "itable"),
        })
    }

    pub fn dev(&self) -> u32 {
        self.dev
    }

    pub fn log(&self) -> &Arc<Log> {
        &self.log
    }

    pub fn begin_op(&self) -> LogOp<'_> {
        self.log.begin_op()
    }

    pub fn root(self: &Arc<Self>) -> Result<Inode> {
        self.get(ROOTINO)
    }

    // Allocate an inode with the given type.
    // Returns an unlocked but allocated and referenced inode.
    // Must be called inside a transaction.
    pub fn alloc(self: &Arc<Self>, itype: FileType) -> Result<Inode> {
        let sb = *self.log.sb();
        for inum in 1..sb.ninodes {
            let is_free = |bp: &Block| {
                DInode::read_from(&bp[dinode_range(inum)]).map_or(false, |d| d.itype == 0)
            };
            if !self.log.read_with(sb.iblock(inum), is_free) {
                continue;
            }
            let claimed = self.log.modify(sb.iblock(inum), |bp| {
                if !is_free(&*bp) {
                    return false;
                }
                let mut dip = DInode::new_zeroed();
                dip.itype = itype as u16;
                bp[dinode_range(inum)].copy_from_slice(dip.as_bytes());
                true
            });
            if claimed {
                return self.get(inum);
            }
        }
        log::warn!("ialloc: no inodes");
        Err(StorageFull)
    }

    // Find the inode with number inum and return the in-memory
    // copy. Does not lock the inode and does not read it from disk.
    pub fn get(self: &Arc<Self>, inum: u32) -> Result<Inode> {
        let mut guard = self.itable.lock();

        // Is the inode already in the table?
        let mut empty: Option<&mut Option<Arc<MInode>>> = None;
        for ip in guard.iter_mut() {
            match ip {
                Some(ip) if ip.inum == inum => {
                    return Ok(Inode::new(Arc::clone(ip), Arc::clone(self)));
                }
                None if empty.is_none() => {
                    empty = Some(ip);
                }
                _ => (),
            }
        }

        // Recycle an inode entry
        let empty = empty.ok_or(FileTableOverflow)?;
        let ip = Arc::new(MInode::new(Arc::clone(&self.log), self.dev, inum));
        empty.replace(Arc::clone(&ip));
        Ok(Inode::new(ip, Arc::clone(self)))
    }

    // Drop a reference to an in-memory inode.
    // If that was the last reference, the inode table entry can
    // be recycled.
    // If that was the last reference and the inode has no links
    // to it, free the inode (and its content) on disk.
    // All calls to put() must be inside a transaction in
    // case it has to free the inode.
    fn put(&self, inode: Arc<MInode>) {
        let guard = self.itable.lock();

        if Arc::strong_count(&inode) != 2 {
            // release the handle under the table lock, so a racing
            // put() of the last other handle sees the true count.
            drop(inode);
            drop(guard);
            return;
        }

        // strong_count 2 means no other handle exists, so no other
        // thread can have the inode sleeplocked: this won't block.
        let mut idata = inode.data.lock();
        let itable = Mutex::unlock(guard);

        if idata.valid && idata.nlink == 0 {
            // inode has no links and no other references: truncate and free.
            log::debug!("iput: free inode {}", inode.inum);
            idata.trunc();
            idata.set_type(FileType::Empty);
            idata.valid = false;
        }
        drop(idata);

        let mut guard = itable.lock();
        // a concurrent get() may have handed out the entry again.
        if Arc::strong_count(&inode) == 2 {
            for mip in guard.iter_mut() {
                if matches!(mip, Some(ip) if Arc::ptr_eq(&inode, ip)) {
                    mip.take();
                }
            }
        }
        drop(inode);
    }

    // Number of in-memory inode table entries in use.
    pub fn active_inodes(&self) -> usize {
        self.itable.lock().iter().filter(|ip| ip.is_some()).count()
    }
}

// Create the path new as a link to the same inode as old.
// Must be called inside a transaction.
pub fn link(old: &Path, new: &Path, cwd: &Inode) -> Result<()> {
    let (_, ip) = old.namei(cwd)?;
    {
        let mut ip_guard = ip.lock();
        if ip_guard.itype() == FileType::Dir {
            return Err(IsADirectory);
        }
        ip_guard.set_nlink(LinkOp::Plus)?;
    }

    let linked = new.nameiparent(cwd).and_then(|(name, dp)| {
        let mut dp_guard = dp.lock();
        if dp.dev != ip.dev {
            return Err(CrossesDevices);
        }
        dp_guard.dirlink(name, ip.inum)
    });

    if linked.is_err() {
        ip.lock().set_nlink(LinkOp::Minus)?;
    }
    linked
}

// Remove the directory entry for path.
// Must be called inside a transaction.
pub fn unlink(path: &Path, cwd: &Inode) -> Result<()> {
    let (name, dp) = path.nameiparent(cwd)?;
    let mut dp_guard = dp.lock();

    // Cannot unlink "." or "..".
    if name == "." || name == ".." {
        return Err(InvalidArgument);
    }

    let (inum, off) = dp_guard.dirlookup(name)?;
    let ip = dp.fs().get(inum)?;
    let mut ip_guard = ip.lock();

    if ip_guard.nlink() < 1 {
        panic!("unlink: nlink < 1");
    }
    if ip_guard.itype() == FileType::Dir && !ip_guard.is_dir_empty() {
        return Err(DirectoryNotEmpty);
    }

    if dp_guard.write_dirent(off, &DirEnt::default()).is_err() {
        panic!("unlink: writei");
    }
    if ip_guard.itype() == FileType::Dir {
        // the removed directory's ".." no longer refers to dp.
        dp_guard.set_nlink(LinkOp::Minus)?;
    }
    drop(dp_guard);

    ip_guard.set_nlink(LinkOp::Minus)?;
    Ok(())
}

// Create a new inode named by path, or return the existing plain
// file when a plain file is asked for. The inode is returned unlocked.
// Must be called inside a transaction.
pub fn create(
    path: &Path,
    cwd: &Inode,
    itype: FileType,
    major: u16,
    minor: u16,
) -> Result<Inode> {
    let (name, dp) = path.nameiparent(cwd)?;
    let mut dp_guard = dp.lock();

    match dp_guard.dirlookup(name) {
        Ok((inum, _)) => {
            // take the reference before a racing unlink can free it.
            let ip = dp.fs().get(inum)?;
            drop(dp_guard);
            let found = ip.lock().itype();
            return match (itype, found) {
                (FileType::File, FileType::File) => Ok(ip),
                _ => Err(AlreadyExists),
            };
        }
        Err(NotFound) => (),
        Err(err) => return Err(err),
    }

    let ip = dp.fs().alloc(itype)?;
    {
        let mut ip_guard = ip.lock();
        ip_guard.set_major_minor(major, minor);
        ip_guard.set_nlink(LinkOp::Init(1))?;

        if itype == FileType::Dir {
            // Create . and .. entries.
            // No nlink++ for ".": avoid cyclic ref count.
            if ip_guard.dirlink(".", ip.inum).is_err()
                || ip_guard.dirlink("..", dp.inum).is_err()
            {
                panic!("create dots");
            }
        }
    }

    if dp_guard.dirlink(name, ip.inum).is_err() {
        panic!("create: dirlink");
    }

    if itype == FileType::Dir {
        // now that success is guaranteed:
        dp_guard.set_nlink(LinkOp::Plus)?; // for ".."
    }

    Ok(ip)
}

// Paths

// A slice of a path (akin to str).
#[derive(Debug, PartialEq, Eq)]
#[repr(transparent)]
pub struct Path {
    inner: str,
}

impl AsRef<Path> for str {
    fn as_ref(&self) -> &Path {
        Path::new(self)
    }
}

impl Path {
    pub fn new<S: AsRef<str> + ?Sized>(s: &S) -> &Path {
        // SAFETY: Path is a transparent wrapper around str.
        unsafe { &*(s.as_ref() as *const str as *const Path) }
    }

    pub fn as_str(&self) -> &str {
        &self.inner
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    // Last path element, if there is one.
    pub fn file_name(&self) -> Option<&str> {
        self.inner.rsplit('/').find(|elem| !elem.is_empty())
    }

    // Split off the next path element.
    //
    // Examples:
    //   skip_elem("a/bb/c") = Some(("a", "bb/c"))
    //   skip_elem("///a//bb") = Some(("a", "bb"))
    //   skip_elem("a") = Some(("a", ""))
    //   skip_elem("") = skip_elem("////") = None
    pub fn skip_elem(&self) -> Option<(&str, &Path)> {
        let s = self.inner.trim_start_matches('/');
        if s.is_empty() {
            return None;
        }
        let (name, rest) = s.split_once('/').unwrap_or((s, ""));
        Some((name, Path::new(rest.trim_start_matches('/'))))
    }

    // Look up and return the inode for a path name.
    // If parent is true, return the inode for the parent and the
    // final path element.
    // Relative paths start at cwd.
    // Must be called inside a transaction since it drops inodes.
    fn namex(&self, cwd: &Inode, parent: bool) -> Result<(&str, Inode)> {
        if self.is_empty() {
            return Err(NotFound);
        }
        let mut ip = if self.inner.starts_with('/') {
            cwd.fs().root()?
        } else {
            cwd.dup()
        };

        let mut path = self;
        while let Some((name, rest)) = path.skip_elem() {
            if name.len() > DIRSIZ {
                return Err(InvalidArgument);
            }
            let guard = ip.lock();
            if guard.itype() != FileType::Dir {
                return Err(NotADirectory);
            }
            if parent && rest.skip_elem().is_none() {
                // Stop one level early.
                drop(guard);
                return Ok((name, ip));
            }
            let (inum, _) = guard.dirlookup(name)?;
            let next = ip.fs().get(inum)?;
            drop(guard);
            ip = next;
            path = rest;
        }
        if parent {
            return Err(NotFound);
        }
        Ok(("", ip))
    }

    pub fn namei(&self, cwd: &Inode) -> Result<(&str, Inode)> {
        self.namex(cwd, false)
    }

    pub fn nameiparent(&self, cwd: &Inode) -> Result<(&str, Inode)> {
        self.namex(cwd, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::ROOTDEV;
    use std::sync::Barrier;
    use std::thread;

    fn fs() -> Arc<FileSystem> {
        FileSystem::new(ROOTDEV, Arc::new(RamDisk::mkfs(512, 64)))
    }

    fn nlink(ip: &Inode) -> u16 {
        ip.lock().nlink()
    }

    #[test]
    fn on_disk_layouts() {
        assert_eq!(size_of::<DInode>(), 64);
        assert_eq!(size_of::<DirEnt>(), 16);
        assert_eq!(size_of::<SuperBlock>(), 24);
        assert_eq!(DirEnt::new("abc", 3).name(), b"abc");
        assert_eq!(DirEnt::new("fourteen_bytes", 3).name(), b"fourteen_bytes");
    }

    #[test]
    fn skip_elem() {
        let p = Path::new("a/bb/c");
        assert_eq!(p.skip_elem(), Some(("a", Path::new("bb/c"))));
        assert_eq!(Path::new("///a//bb").skip_elem(), Some(("a", Path::new("bb"))));
        assert_eq!(Path::new("a").skip_elem(), Some(("a", Path::new(""))));
        assert_eq!(Path::new("").skip_elem(), None);
        assert_eq!(Path::new("////").skip_elem(), None);
        assert_eq!(Path::new("/usr/bin/").file_name(), Some("bin"));
    }

    #[test]
    fn root_is_its_own_parent() {
        let fs = fs();
        let root = fs.root().unwrap();
        let _op = fs.begin_op();
        let (_, ip) = Path::new("/..").namei(&root).unwrap();
        assert_eq!(ip.inum(), ROOTINO);
        let (_, ip) = Path::new("/").namei(&root).unwrap();
        assert_eq!(ip.inum(), ROOTINO);
        assert_eq!(Path::new("/").nameiparent(&root).err(), Some(NotFound));
        assert_eq!(Path::new("").namei(&root).err(), Some(NotFound));
    }

    #[test]
    fn create_dir_links() {
        let fs = fs();
        let root = fs.root().unwrap();
        let _op = fs.begin_op();
        let d = create(Path::new("/d"), &root, FileType::Dir, 0, 0).unwrap();
        // "." does not count, ".." counts toward the parent.
        assert_eq!(nlink(&d), 1);
        assert_eq!(nlink(&root), 2);
        {
            let guard = d.lock();
            assert_eq!(guard.dirlookup("."), Ok((d.inum(), 0)));
            assert_eq!(guard.dirlookup("..").map(|(inum, _)| inum), Ok(ROOTINO));
        }
        let (_, sub) = Path::new("d/..").namei(&root).unwrap();
        assert_eq!(sub.inum(), ROOTINO);
        let (name, parent) = Path::new("/d/x").nameiparent(&root).unwrap();
        assert_eq!((name, parent.inum()), ("x", d.inum()));
    }

    #[test]
    fn create_existing() {
        let fs = fs();
        let root = fs.root().unwrap();
        let _op = fs.begin_op();
        let f = create(Path::new("f"), &root, FileType::File, 0, 0).unwrap();
        let g = create(Path::new("f"), &root, FileType::File, 0, 0).unwrap();
        assert_eq!(f.inum(), g.inum());
        assert_eq!(
            create(Path::new("f"), &root, FileType::Dir, 0, 0).err(),
            Some(AlreadyExists)
        );
        create(Path::new("d"), &root, FileType::Dir, 0, 0).unwrap();
        assert_eq!(
            create(Path::new("d"), &root, FileType::File, 0, 0).err(),
            Some(AlreadyExists)
        );
        assert_eq!(
            create(Path::new("f/x"), &root, FileType::File, 0, 0).err(),
            Some(NotADirectory)
        );
        assert_eq!(
            create(Path::new("fifteen_letters"), &root, FileType::File, 0, 0).err(),
            Some(InvalidArgument)
        );
    }

    #[test]
    fn link_failure_rolls_back() {
        let fs = fs();
        let root = fs.root().unwrap();
        let _op = fs.begin_op();
        let a = create(Path::new("a"), &root, FileType::File, 0, 0).unwrap();
        create(Path::new("b"), &root, FileType::File, 0, 0).unwrap();
        assert_eq!(link(Path::new("a"), Path::new("b"), &root), Err(AlreadyExists));
        assert_eq!(nlink(&a), 1);
        assert_eq!(link(Path::new("a"), Path::new("nodir/c"), &root), Err(NotFound));
        assert_eq!(nlink(&a), 1);
        assert_eq!(link(Path::new("/"), Path::new("r"), &root), Err(IsADirectory));
        link(Path::new("a"), Path::new("c"), &root).unwrap();
        assert_eq!(nlink(&a), 2);
    }

    #[test]
    fn unlink_dir() {
        let fs = fs();
        let root = fs.root().unwrap();
        let _op = fs.begin_op();
        create(Path::new("d"), &root, FileType::Dir, 0, 0).unwrap();
        create(Path::new("d/f"), &root, FileType::File, 0, 0).unwrap();
        assert_eq!(unlink(Path::new("d"), &root), Err(DirectoryNotEmpty));
        assert_eq!(nlink(&root), 2);
        assert_eq!(unlink(Path::new("d/."), &root), Err(InvalidArgument));
        assert_eq!(unlink(Path::new("d/.."), &root), Err(InvalidArgument));
        unlink(Path::new("d/f"), &root).unwrap();
        unlink(Path::new("d"), &root).unwrap();
        assert_eq!(nlink(&root), 1);
        assert_eq!(Path::new("d").namei(&root).err(), Some(NotFound));
    }

    #[test]
    fn racing_puts_free_unlinked_inode() {
        let fs = fs();
        let root = fs.root().unwrap();
        let mut inum = None;
        for _ in 0..50 {
            let ip = {
                let _op = fs.begin_op();
                let ip = create(Path::new("f"), &root, FileType::File, 0, 0).unwrap();
                unlink(Path::new("f"), &root).unwrap();
                ip
            };
            // the previous round freed it on disk.
            assert_eq!(*inum.get_or_insert(ip.inum()), ip.inum());

            let barrier = Arc::new(Barrier::new(6));
            let handles: Vec<_> = (0..6)
                .map(|_| {
                    let (fs, ip, barrier) = (Arc::clone(&fs), ip.dup(), Arc::clone(&barrier));
                    thread::spawn(move || {
                        barrier.wait();
                        let _op = fs.begin_op();
                        drop(ip);
                    })
                })
                .collect();
            {
                let _op = fs.begin_op();
                drop(ip);
            }
            for h in handles {
                h.join().unwrap();
            }
            assert_eq!(fs.active_inodes(), 1);
        }
    }

    #[test]
    fn read_write_across_indirect_block() {
        let fs = fs();
        let root = fs.root().unwrap();
        let data: Vec<u8> = (0..(NDIRECT + 2) * BSIZE).map(|i| (i % 251) as u8).collect();
        let f = {
            let _op = fs.begin_op();
            create(Path::new("big"), &root, FileType::File, 0, 0).unwrap()
        };
        for chunk in data.chunks(3 * BSIZE).enumerate() {
            let _op = fs.begin_op();
            let off = (chunk.0 * 3 * BSIZE) as u32;
            assert_eq!(f.lock().write(off, chunk.1), Ok(chunk.1.len()));
        }
        let mut back = vec![0u8; data.len() + 10];
        let guard = f.lock();
        assert_eq!(guard.size() as usize, data.len());
        assert_eq!(guard.read(0, &mut back), Ok(data.len()));
        assert_eq!(&back[..data.len()], &data[..]);
        assert_eq!(guard.read(guard.size() + 1, &mut back), Ok(0));
    }

    #[test]
    fn write_past_end_fails() {
        let fs = fs();
        let root = fs.root().unwrap();
        let _op = fs.begin_op();
        let f = create(Path::new("f"), &root, FileType::File, 0, 0).unwrap();
        let mut guard = f.lock();
        assert_eq!(guard.write(1, b"x"), Err(FileTooLarge));
        assert_eq!(guard.write((MAXFILE * BSIZE) as u32, b""), Err(FileTooLarge));
    }

    #[test]
    fn last_put_frees_unlinked_inode() {
        let fs = fs();
        let root = fs.root().unwrap();
        let inum = {
            let _op = fs.begin_op();
            let f = create(Path::new("tmp"), &root, FileType::File, 0, 0).unwrap();
            f.lock().write(0, b"scratch").unwrap();
            unlink(Path::new("tmp"), &root).unwrap();
            assert_eq!(f.lock().nlink(), 0);
            f.inum()
        };
        let sb = *fs.log().sb();
        let itype = fs.log().read_with(sb.iblock(inum), |bp| {
            DInode::read_from(&bp[dinode_range(inum)]).unwrap().itype
        });
        assert_eq!(itype, FileType::Empty as u16);
        assert_eq!(fs.active_inodes(), 1);
    }

    #[test]
    fn inode_table_overflow() {
        let fs = fs();
        let root = fs.root().unwrap();
        let _op = fs.begin_op();
        let held: Vec<Inode> = (2..NINODE as u32 + 1).map(|i| fs.get(i).unwrap()).collect();
        assert_eq!(held.len(), NINODE - 1);
        assert_eq!(fs.get(NINODE as u32 + 1).err(), Some(FileTableOverflow));
        assert_eq!(fs.get(ROOTINO).map(|ip| ip.inum()), Ok(root.inum()));
    }
}
