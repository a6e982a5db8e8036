use crate::{
    error::{Error::*, Result},
    fcntl::OMode,
    file::{FTable, FType, File},
    proc::{sleep, wakeup},
    spinlock::Mutex,
};
use std::sync::Arc;

const PIPESIZE: usize = 512;

#[derive(Debug)]
struct PipeData {
    data: [u8; PIPESIZE],
    nread: usize, // number of bytes read
    nwrite: usize, // number of bytes written
    readopen: bool, // read fd is still open
    writeopen: bool, // write fd is still open
}

// One end of a pipe. Dropping it closes that end.
#[derive(Debug)]
pub struct Pipe {
    inner: Arc<Mutex<PipeData>>,
    writer: bool,
}

impl Pipe {
    // A connected (read end, write end) pair.
    pub fn new() -> (Pipe, Pipe) {
        let inner = Arc::new(Mutex::new(
            PipeData {
                data: [0; PIPESIZE],
                nread: 0,
                nwrite: 0,
                readopen: true,
                writeopen: true,
            },
            "pipe",
        ));
        (
            Self {
                inner: Arc::clone(&inner),
                writer: false,
            },
            Self {
                inner,
                writer: true,
            },
        )
    }

    pub fn get_mode(&self) -> OMode {
        let mut omode = OMode::new();
        omode.read(!self.writer).write(self.writer);
        omode
    }

    // Allocate file structures for both ends.
    // Either both files come back, or neither end stays open.
    pub fn alloc(ftable: &Arc<FTable>) -> Result<(File, File)> {
        let (p0, p1) = Self::new();
        let f0 = ftable.alloc(p0.get_mode(), FType::Pipe(p0))?;
        let f1 = ftable.alloc(p1.get_mode(), FType::Pipe(p1))?;
        Ok((f0, f1))
    }

    pub fn write(&self, src: &[u8]) -> Result<usize> {
        if !self.writer {
            return Err(BadFileDescriptor);
        }
        let mut pi = self.inner.lock();

        let mut i = 0;
        while i < src.len() {
            if !pi.readopen {
                return Err(BrokenPipe);
            }
            if pi.nwrite == pi.nread + PIPESIZE {
                wakeup();
                pi = sleep(pi);
            } else {
                let at = pi.nwrite % PIPESIZE;
                pi.data[at] = src[i];
                pi.nwrite += 1;
                i += 1;
            }
        }
        wakeup();
        Ok(i)
    }

    pub fn read(&self, dst: &mut [u8]) -> Result<usize> {
        if self.writer {
            return Err(BadFileDescriptor);
        }
        let mut pi = self.inner.lock();

        while pi.nread == pi.nwrite && pi.writeopen {
            pi = sleep(pi);
        }
        let mut i = 0;
        while i < dst.len() && pi.nread != pi.nwrite {
            dst[i] = pi.data[pi.nread % PIPESIZE];
            pi.nread += 1;
            i += 1;
        }
        wakeup();
        Ok(i)
    }
}

impl Drop for Pipe {
    fn drop(&mut self) {
        let mut pi = self.inner.lock();
        if self.writer {
            pi.writeopen = false;
        } else {
            pi.readopen = false;
        }
        wakeup();
    }
}
