use crate::{
    fs::{SuperBlock, BSIZE, FSMAGIC},
    param::{LOGSIZE, MAXOPBLOCKS},
    proc::{sleep, wakeup},
    ramdisk::{Block, RamDisk},
    spinlock::Mutex,
};
use core::mem::size_of;
use std::sync::Arc;
use zerocopy::FromBytes;

// Transactions for multi-step file system updates.
//
// A system call calls begin_op() at its start and keeps the returned
// LogOp alive until it is done; dropping the LogOp is end_op(). Usually
// begin_op() just increments the count of in-progress FS system calls.
// But if it thinks the log is close to running out, it sleeps until the
// last outstanding end_op() commits.
//
// Every block modified inside a transaction stays in the log, and
// readers see the logged copy, until the last outstanding operation ends.
// Then all logged blocks are installed on the disk together. Nothing
// is written to disk while any operation is in flight.
//
// There is no on-disk log and no recovery: a crash mid-commit is not
// modelled.

// In-memory log header: block #s of logged blocks, and their contents.
#[derive(Debug)]
struct LogHeader {
    n: usize,
    block: [u32; LOGSIZE],
    data: Vec<Block>,
}

#[derive(Debug)]
struct LogState {
    outstanding: usize,
    lh: LogHeader,
}

#[derive(Debug)]
pub struct Log {
    dev: u32,
    sb: SuperBlock,
    disk: Arc<RamDisk>,
    state: Mutex<LogState>,
}

// An open transaction. Ends when dropped.
#[must_use = "the transaction ends as soon as the LogOp is dropped"]
#[derive(Debug)]
pub struct LogOp<'a> {
    log: &'a Log,
}

impl Drop for LogOp<'_> {
    fn drop(&mut self) {
        self.log.end_op();
    }
}

impl Log {
    pub fn new(dev: u32, disk: Arc<RamDisk>) -> Self {
        let mut buf: Block = [0; BSIZE];
        disk.read(1, &mut buf);
        let sb = SuperBlock::read_from(&buf[..size_of::<SuperBlock>()])
            .unwrap_or_else(|| panic!("log: short superblock"));
        assert!(sb.magic == FSMAGIC, "invalid file system");
        Self {
            dev,
            sb,
            disk,
            state: Mutex::new(
                LogState {
                    outstanding: 0,
                    lh: LogHeader {
                        n: 0,
                        block: [0; LOGSIZE],
                        data: Vec::with_capacity(LOGSIZE),
                    },
                },
                "log",
            ),
        }
    }

    pub fn dev(&self) -> u32 {
        self.dev
    }

    pub fn sb(&self) -> &SuperBlock {
        &self.sb
    }

    pub fn disk(&self) -> &Arc<RamDisk> {
        &self.disk
    }

    // called at the start of each FS system call.
    pub fn begin_op(&self) -> LogOp<'_> {
        let mut guard = self.state.lock();
        // this op might exhaust log space; wait for commit.
        while guard.lh.n + (guard.outstanding + 1) * MAXOPBLOCKS > LOGSIZE {
            guard = sleep(guard);
        }
        guard.outstanding += 1;
        LogOp { log: self }
    }

    // called at the end of each FS system call.
    // commits if this was the last outstanding operation.
    fn end_op(&self) {
        let mut guard = self.state.lock();
        assert!(guard.outstanding > 0, "end_op: no transaction");
        guard.outstanding -= 1;
        if guard.outstanding == 0 {
            self.commit(&mut guard.lh);
        }
        // begin_op() may be waiting for log space,
        // and decrementing outstanding has decreased
        // the amount of reserved space.
        wakeup();
    }

    // Install logged blocks to their home location.
    fn commit(&self, lh: &mut LogHeader) {
        if lh.n > 0 {
            log::trace!("log: dev {} commit {} blocks", self.dev, lh.n);
            for (&blockno, data) in lh.block.iter().zip(lh.data.iter()).take(lh.n) {
                self.disk.write(blockno, data);
            }
            lh.n = 0;
            lh.data.clear();
        }
    }

    // Number of operations currently inside a transaction.
    pub fn outstanding(&self) -> usize {
        self.state.lock().outstanding
    }

    // Number of distinct blocks waiting for commit.
    pub fn pending(&self) -> usize {
        self.state.lock().lh.n
    }

    // Look at block contents, including uncommitted changes.
    pub fn read_with<R>(&self, blockno: u32, f: impl FnOnce(&Block) -> R) -> R {
        let guard = self.state.lock();
        let lh = &guard.lh;
        match lh.block[..lh.n].iter().position(|&b| b == blockno) {
            Some(i) => f(&lh.data[i]),
            None => {
                let mut buf: Block = [0; BSIZE];
                self.disk.read(blockno, &mut buf);
                f(&buf)
            }
        }
    }

    // Modify a block inside the current transaction. The block is
    // recorded in the log (absorbing repeated writes) and reaches the
    // disk at commit.
    pub fn modify<R>(&self, blockno: u32, f: impl FnOnce(&mut Block) -> R) -> R {
        let mut guard = self.state.lock();
        if guard.outstanding < 1 {
            panic!("log write outside of trans");
        }
        let lh = &mut guard.lh;
        let i = match lh.block[..lh.n].iter().position(|&b| b == blockno) {
            Some(i) => i, // log absorption
            None => {
                if lh.n >= LOGSIZE || lh.n as u32 >= self.sb.size {
                    panic!("too big a transaction");
                }
                let mut buf: Block = [0; BSIZE];
                self.disk.read(blockno, &mut buf);
                lh.block[lh.n] = blockno;
                lh.data.push(buf);
                lh.n += 1;
                lh.n - 1
            }
        };
        f(&mut lh.data[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log() -> Log {
        Log::new(1, Arc::new(RamDisk::mkfs(128, 16)))
    }

    fn on_disk(log: &Log, blockno: u32) -> u8 {
        let mut buf: Block = [0; BSIZE];
        log.disk().read(blockno, &mut buf);
        buf[0]
    }

    #[test]
    fn changes_install_at_outermost_end() {
        let log = log();
        let outer = log.begin_op();
        {
            let _inner = log.begin_op();
            log.modify(100, |b| b[0] = 7);
            log.modify(100, |b| b[0] += 1);
            assert_eq!(log.pending(), 1);
        }
        assert_eq!(log.read_with(100, |b| b[0]), 8);
        assert_eq!(on_disk(&log, 100), 0);
        drop(outer);
        assert_eq!(log.pending(), 0);
        assert_eq!(log.outstanding(), 0);
        assert_eq!(on_disk(&log, 100), 8);
    }

    #[test]
    #[should_panic(expected = "outside of trans")]
    fn write_outside_transaction_panics() {
        let log = log();
        log.modify(100, |b| b[0] = 1);
    }

    #[test]
    #[should_panic(expected = "invalid file system")]
    fn rejects_unformatted_disk() {
        Log::new(1, Arc::new(RamDisk::new(16)));
    }
}
