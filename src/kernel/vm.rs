use crate::error::{Error::*, Result};
use crate::param::PGSIZE;
use core::ops::{Add, AddAssign, Sub, SubAssign};

// User virtual address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct UVAddr(usize);

impl UVAddr {
    pub fn into_usize(self) -> usize {
        self.0
    }
}

impl From<usize> for UVAddr {
    fn from(addr: usize) -> Self {
        UVAddr(addr)
    }
}

impl Add<usize> for UVAddr {
    type Output = UVAddr;
    fn add(self, rhs: usize) -> Self::Output {
        UVAddr(self.0.wrapping_add(rhs))
    }
}

impl AddAssign<usize> for UVAddr {
    fn add_assign(&mut self, rhs: usize) {
        self.0 = self.0.wrapping_add(rhs);
    }
}

impl Sub<usize> for UVAddr {
    type Output = UVAddr;
    fn sub(self, rhs: usize) -> Self::Output {
        UVAddr(self.0.wrapping_sub(rhs))
    }
}

impl SubAssign<usize> for UVAddr {
    fn sub_assign(&mut self, rhs: usize) {
        self.0 = self.0.wrapping_sub(rhs);
    }
}

pub const fn pgroundup(sz: usize) -> usize {
    (sz + PGSIZE - 1) & !(PGSIZE - 1)
}

// A process's user memory: a flat image addressed from 0 to sz.
// Every access from the kernel is range-checked.
#[derive(Debug, Clone, Default)]
pub struct Uvm {
    mem: Vec<u8>,
}

impl Uvm {
    pub fn new(sz: usize) -> Self {
        Self { mem: vec![0; sz] }
    }

    pub fn from_image(mem: Vec<u8>) -> Self {
        Self { mem }
    }

    pub fn size(&self) -> usize {
        self.mem.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.mem
    }

    fn range(&self, va: UVAddr, len: usize) -> Result<core::ops::Range<usize>> {
        let start = va.into_usize();
        let end = start.checked_add(len).ok_or(BadVirtAddr)?;
        if end > self.mem.len() {
            return Err(BadVirtAddr);
        }
        Ok(start..end)
    }

    // Check that [va, va+len) lies inside user memory.
    pub fn check(&self, va: UVAddr, len: usize) -> Result<()> {
        self.range(va, len).map(|_| ())
    }

    // Copy from kernel to user.
    pub fn copyout(&mut self, dstva: UVAddr, src: &[u8]) -> Result<()> {
        let range = self.range(dstva, src.len())?;
        self.mem[range].copy_from_slice(src);
        Ok(())
    }

    // Copy from user to kernel.
    pub fn copyin(&self, dst: &mut [u8], srcva: UVAddr) -> Result<()> {
        let range = self.range(srcva, dst.len())?;
        dst.copy_from_slice(&self.mem[range]);
        Ok(())
    }

    // Copy a null-terminated string from user to kernel.
    // Copy bytes to dst from virtual address srcva until a '\0',
    // or until dst is full. Returns the string length without the '\0'.
    pub fn copyinstr(&self, dst: &mut [u8], srcva: UVAddr) -> Result<usize> {
        let start = srcva.into_usize();
        if start >= self.mem.len() {
            return Err(BadVirtAddr);
        }
        let avail = &self.mem[start..];
        for (i, slot) in dst.iter_mut().enumerate() {
            match avail.get(i) {
                Some(0) => return Ok(i),
                Some(&c) => *slot = c,
                None => return Err(BadVirtAddr),
            }
        }
        Err(InvalidArgument)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_bounds() {
        let mut uvm = Uvm::new(64);
        uvm.copyout(60.into(), b"abcd").unwrap();
        assert_eq!(uvm.copyout(61.into(), b"abcd"), Err(BadVirtAddr));
        let mut buf = [0u8; 4];
        uvm.copyin(&mut buf, 60.into()).unwrap();
        assert_eq!(&buf, b"abcd");
        assert_eq!(uvm.copyin(&mut buf, usize::MAX.into()), Err(BadVirtAddr));
    }

    #[test]
    fn copyinstr_needs_terminator() {
        let mut uvm = Uvm::new(32);
        uvm.copyout(0.into(), b"hello\0").unwrap();
        uvm.copyout(8.into(), b"toolongname").unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(uvm.copyinstr(&mut buf, 0.into()), Ok(5));
        assert_eq!(&buf[..5], b"hello");
        assert_eq!(uvm.copyinstr(&mut buf, 8.into()), Err(InvalidArgument));
        uvm.copyout(28.into(), b"abcd").unwrap();
        assert_eq!(uvm.copyinstr(&mut buf, 28.into()), Err(BadVirtAddr));
        assert_eq!(uvm.copyinstr(&mut buf, 32.into()), Err(BadVirtAddr));
    }
}
