use core::fmt;

pub type Result<T> = core::result::Result<T, Error>;

// One table gives each error its system call return code and
// its message; from_isize() is the inverse of `err as isize`.
macro_rules! sys_errors {
    ($($name:ident = $code:literal => $msg:literal,)*) => {
        #[repr(isize)]
        #[derive(PartialEq, Eq, Debug, Clone, Copy)]
        pub enum Error {
            $($name = $code,)*
        }

        impl Error {
            pub fn as_str(&self) -> &'static str {
                match *self {
                    $(Error::$name => $msg,)*
                }
            }

            pub fn from_isize(code: isize) -> Self {
                match code {
                    $($code => Error::$name,)*
                    _ => Error::Uncategorized,
                }
            }
        }
    };
}

sys_errors! {
    Uncategorized = -1 => "uncategorized error",
    NotFound = -3 => "entry not found",
    BadVirtAddr = -5 => "bad virtual address",
    StorageFull = -6 => "no storage space",
    TooManyLinks = -7 => "too many links",
    BadFileDescriptor = -13 => "bad file descriptor",
    DescriptorTableFull = -14 => "too many open files in process",
    FileTooLarge = -15 => "file too large",
    AlreadyExists = -16 => "entity already exists",
    IsADirectory = -17 => "is a directory",
    NotADirectory = -18 => "not a directory",
    CrossesDevices = -19 => "cross-device link or rename",
    DirectoryNotEmpty = -21 => "directory not empty",
    FileTableOverflow = -22 => "inode or file table overflow in system",
    InvalidArgument = -23 => "invalid argument",
    NoSuchNode = -24 => "no such node or address",
    BrokenPipe = -25 => "broken pipe",
    ExecFileFormatError = -26 => "executable file format error",
    Utf8Error = -28 => "slice is not utf8",
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::Error::{self, *};

    #[test]
    fn codes_round_trip_through_sentinel() {
        for err in [NotFound, DirectoryNotEmpty, BrokenPipe, Utf8Error].map(|e| e as isize) {
            assert!(err < 0);
            assert_eq!(Error::from_isize(err) as isize, err);
        }
        assert_eq!(Error::from_isize(-1000), Uncategorized);
        assert_eq!(Error::from_isize(0), Uncategorized);
    }

    #[test]
    fn messages() {
        assert_eq!(
            DescriptorTableFull.to_string(),
            "too many open files in process"
        );
        assert_eq!(format!("{}", IsADirectory), "is a directory");
    }
}
