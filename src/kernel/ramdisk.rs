use crate::fs::{DInode, DirEnt, SuperBlock, BPB, BSIZE, FSMAGIC, IPB, ROOTINO};
use crate::spinlock::Mutex;
use crate::stat::FileType;
use core::mem::size_of;
use zerocopy::{AsBytes, FromZeroes};

pub type Block = [u8; BSIZE];

// Memory-backed block device standing in for the virtio disk.
#[derive(Debug)]
pub struct RamDisk {
    blocks: Mutex<Vec<Block>>,
}

impl RamDisk {
    pub fn new(nblocks: usize) -> Self {
        Self {
            blocks: Mutex::new(vec![[0; BSIZE]; nblocks], "ramdisk"),
        }
    }

    pub fn size(&self) -> usize {
        self.blocks.lock().len()
    }

    pub fn read(&self, blockno: u32, buf: &mut Block) {
        let blocks = self.blocks.lock();
        let b = blocks
            .get(blockno as usize)
            .unwrap_or_else(|| panic!("ramdisk: read block {} out of range", blockno));
        buf.copy_from_slice(b);
    }

    pub fn write(&self, blockno: u32, buf: &Block) {
        let mut blocks = self.blocks.lock();
        let b = blocks
            .get_mut(blockno as usize)
            .unwrap_or_else(|| panic!("ramdisk: write block {} out of range", blockno));
        b.copy_from_slice(buf);
    }

    // Build an empty file system holding only the root directory.
    //
    // Disk layout:
    // [ boot block | super block | inode blocks | free bit map | data blocks ]
    pub fn mkfs(size: u32, ninodes: u32) -> Self {
        let ninodeblocks = ninodes / IPB as u32 + 1;
        let nbitmap = size / BPB + 1;
        let nmeta = 2 + ninodeblocks + nbitmap;
        // directory entries hold 16-bit inode numbers.
        assert!(ninodes <= u16::MAX as u32, "mkfs: {} inodes too many", ninodes);
        assert!(nmeta < size, "mkfs: {} blocks too small", size);

        let sb = SuperBlock {
            magic: FSMAGIC,
            size,
            nblocks: size - nmeta,
            ninodes,
            inodestart: 2,
            bmapstart: 2 + ninodeblocks,
        };
        let disk = Self::new(size as usize);
        let mut buf: Block = [0; BSIZE];
        buf[..size_of::<SuperBlock>()].copy_from_slice(sb.as_bytes());
        disk.write(1, &buf);

        // root directory: "." and ".." both refer to itself.
        let rootblock = nmeta;
        let mut data: Block = [0; BSIZE];
        for (i, name) in [".", ".."].iter().enumerate() {
            let de = DirEnt::new(name, ROOTINO);
            let off = i * size_of::<DirEnt>();
            data[off..off + size_of::<DirEnt>()].copy_from_slice(de.as_bytes());
        }
        disk.write(rootblock, &data);

        let mut din = DInode::new_zeroed();
        din.itype = FileType::Dir as u16;
        din.nlink = 1;
        din.size = 2 * size_of::<DirEnt>() as u32;
        din.addrs[0] = rootblock;
        let mut ib: Block = [0; BSIZE];
        disk.read(sb.iblock(ROOTINO), &mut ib);
        let off = (ROOTINO as usize % IPB) * size_of::<DInode>();
        ib[off..off + size_of::<DInode>()].copy_from_slice(din.as_bytes());
        disk.write(sb.iblock(ROOTINO), &ib);

        // every metadata block plus the root's data block is in use.
        let used = rootblock + 1;
        assert!(used < BPB, "mkfs: bitmap spans more than one block");
        let mut bitmap: Block = [0; BSIZE];
        for b in 0..used as usize {
            bitmap[b / 8] |= 1 << (b % 8);
        }
        disk.write(sb.bmapstart, &bitmap);

        disk
    }
}
