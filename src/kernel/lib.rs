#![allow(clippy::new_without_default)]

pub mod console;
pub mod elf;
pub mod error;
pub mod exec;
pub mod fcntl;
pub mod file;
pub mod fs;
pub mod log;
pub mod null;
pub mod param;
pub mod pipe;
pub mod proc;
pub mod ramdisk;
pub mod sleeplock;
pub mod spinlock;
pub mod start;
pub mod stat;
pub mod syscall;
pub mod vm;

#[cfg(test)]
mod testutil;

// Fixed tables of slots that are not Copy.
pub use array_macro::array;
