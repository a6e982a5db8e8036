use zerocopy::{FromBytes, FromZeroes};

// Format of an ELF executable file

pub const EI_MAG0: usize = 0;
pub const EI_MAG1: usize = 1;
pub const EI_MAG2: usize = 2;
pub const EI_MAG3: usize = 3;

pub const ELFMAG0: u8 = 127;
pub const ELFMAG1: u8 = b'E';
pub const ELFMAG2: u8 = b'L';
pub const ELFMAG3: u8 = b'F';

// File header
#[derive(Debug, Copy, Clone, FromZeroes, FromBytes)]
#[repr(C)]
pub struct ElfHdr {
    pub e_ident: [u8; 16],
    pub e_type: u16,
    pub e_cpu: u16,
    pub e_version: u32,
    pub e_entry: u64,
    pub e_phoff: u64,
    pub e_shoff: u64,
    pub e_flags: u32,
    pub e_ehsize: u16,
    pub e_phsize: u16,
    pub e_phnum: u16,
    pub e_shsize: u16,
    pub e_shnum: u16,
    pub e_shname: u16,
}

impl ElfHdr {
    pub fn is_valid(&self) -> bool {
        self.e_ident[EI_MAG0] == ELFMAG0
            && self.e_ident[EI_MAG1] == ELFMAG1
            && self.e_ident[EI_MAG2] == ELFMAG2
            && self.e_ident[EI_MAG3] == ELFMAG3
    }
}
