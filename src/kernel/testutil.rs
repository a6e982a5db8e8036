// Helpers shared by the system call tests.

use crate::{
    fs::{self, Path},
    proc::Proc,
    stat::FileType,
    vm::UVAddr,
};
use core::mem::size_of;
use std::sync::Arc;

// Smallest image exec accepts: an ELF header with entry point 0x1000.
pub const ELF_IMAGE: &[u8] = &{
    let mut hdr = [0u8; 64];
    hdr[0] = 0x7f;
    hdr[1] = b'E';
    hdr[2] = b'L';
    hdr[3] = b'F';
    let entry = 0x1000u64.to_ne_bytes();
    let mut i = 0;
    while i < entry.len() {
        hdr[24 + i] = entry[i];
        i += 1;
    }
    hdr
};

// Write a plain file with the given contents.
pub fn install(p: &mut Proc, path: &str, contents: &[u8]) {
    let fs = Arc::clone(p.kernel().fs());
    let _op = fs.begin_op();
    let ip = fs::create(Path::new(path), p.data().cwd(), FileType::File, 0, 0).unwrap();
    assert_eq!(ip.lock().write(0, contents), Ok(contents.len()));
}

// Bump allocator for arguments staged in user memory.
#[derive(Debug)]
pub struct Stage {
    next: usize,
}

impl Stage {
    pub fn new() -> Self {
        // keep address 0 free: it is the null pointer.
        Self { next: 16 }
    }

    pub fn alloc(&mut self, len: usize) -> usize {
        let at = self.next;
        self.next = (at + len + 7) & !7;
        at
    }

    pub fn bytes(&mut self, p: &mut Proc, bytes: &[u8]) -> usize {
        let at = self.alloc(bytes.len());
        p.data_mut().uvm.copyout(UVAddr::from(at), bytes).unwrap();
        at
    }

    // A nul-terminated copy of s.
    pub fn str(&mut self, p: &mut Proc, s: &str) -> usize {
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);
        self.bytes(p, &bytes)
    }

    // A null-terminated array of user pointers.
    pub fn ptrs(&mut self, p: &mut Proc, ptrs: &[usize]) -> usize {
        let words: Vec<u8> = ptrs
            .iter()
            .chain([0].iter())
            .flat_map(|w| w.to_ne_bytes())
            .collect();
        debug_assert_eq!(words.len(), (ptrs.len() + 1) * size_of::<usize>());
        self.bytes(p, &words)
    }
}
