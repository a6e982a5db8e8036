use bitflags::bitflags;

bitflags! {
    // open(2) mode bits as passed by user code.
    // O_RDONLY is the absence of both access bits.
    pub struct OFlags: usize {
        const WRONLY = 0x001;
        const RDWR = 0x002;
        const CREATE = 0x200;
        const TRUNC = 0x400;
        const APPEND = 0x800;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OMode {
    read: bool,
    write: bool,
    truncate: bool,
    create: bool,
    append: bool,
}

impl Default for OMode {
    fn default() -> Self {
        Self::new()
    }
}

impl OMode {
    pub fn new() -> Self {
        Self {
            read: false,
            write: false,
            truncate: false,
            create: false,
            append: false,
        }
    }

    pub fn read(&mut self, read: bool) -> &mut Self {
        self.read = read;
        self
    }
    pub fn write(&mut self, write: bool) -> &mut Self {
        self.write = write;
        self
    }
    pub fn append(&mut self, append: bool) -> &mut Self {
        self.append = append;
        self
    }
    pub fn truncate(&mut self, truncate: bool) -> &mut Self {
        self.truncate = truncate;
        self
    }
    pub fn create(&mut self, create: bool) -> &mut Self {
        self.create = create;
        self
    }

    // Unknown bits are ignored. Neither WRONLY nor RDWR means read-only,
    // whatever the type of the file being opened.
    pub fn from_usize(bits: usize) -> Self {
        let flags = OFlags::from_bits_truncate(bits);
        let mut mode = Self::new();
        mode.read(!flags.contains(OFlags::WRONLY))
            .write(flags.intersects(OFlags::WRONLY | OFlags::RDWR))
            .create(flags.contains(OFlags::CREATE))
            .truncate(flags.contains(OFlags::TRUNC))
            .append(flags.contains(OFlags::APPEND));
        mode
    }

    pub fn is_read(&self) -> bool {
        self.read
    }

    pub fn is_write(&self) -> bool {
        self.write
    }

    pub fn is_create(&self) -> bool {
        self.create
    }

    pub fn is_trunc(&self) -> bool {
        self.truncate
    }

    pub fn is_rdonly(&self) -> bool {
        self.read && !self.write
    }

    pub fn is_append(&self) -> bool {
        self.append
    }
}
