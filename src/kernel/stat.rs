use zerocopy::AsBytes;

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, AsBytes)]
pub enum FileType {
    #[default]
    Empty = 0,
    Dir = 1,
    File = 2,
    Device = 3,
}

impl FileType {
    pub fn from_u16(bits: u16) -> Self {
        match bits {
            1 => FileType::Dir,
            2 => FileType::File,
            3 => FileType::Device,
            _ => FileType::Empty,
        }
    }
}

// Layout copied out to user memory by fstat.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, AsBytes)]
#[repr(C)]
pub struct Stat {
    pub dev: u32,        // File system's disk device
    pub ino: u32,        // Inode number
    pub ftype: FileType, // Type of file
    pub nlink: u16,      // Number of links to file
    pub size: u32,       // Size of file in bytes
}

impl Stat {
    // Decode the user-visible layout.
    #[cfg(test)]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let word = |at: usize| -> Option<u32> {
            Some(u32::from_ne_bytes(bytes.get(at..at + 4)?.try_into().ok()?))
        };
        let half = |at: usize| -> Option<u16> {
            Some(u16::from_ne_bytes(bytes.get(at..at + 2)?.try_into().ok()?))
        };
        Some(Self {
            dev: word(0)?,
            ino: word(4)?,
            ftype: FileType::from_u16(half(8)?),
            nlink: half(10)?,
            size: word(12)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_layout_is_sixteen_bytes() {
        let st = Stat {
            dev: 1,
            ino: 7,
            ftype: FileType::Dir,
            nlink: 3,
            size: 64,
        };
        let bytes = st.as_bytes();
        assert_eq!(bytes.len(), 16);
        assert_eq!(Stat::from_bytes(bytes), Some(st));
        assert_eq!(Stat::from_bytes(&bytes[..10]), None);
    }
}
