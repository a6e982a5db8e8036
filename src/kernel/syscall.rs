use crate::{
    error::{Error::*, Result},
    exec::exec,
    fcntl::OMode,
    file::{FType, File},
    fs::{self, Path},
    param::{MAXARG, MAXPATH, PGSIZE},
    pipe::Pipe,
    proc::Proc,
    stat::FileType,
    vm::UVAddr,
};
use core::mem::size_of;
use core::str;
use std::sync::Arc;
use zerocopy::AsBytes;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(usize)]
pub enum SysCalls {
    Pipe = 4,
    Read = 5,
    Exec = 7,
    Fstat = 8,
    Chdir = 9,
    Dup = 10,
    Open = 15,
    Write = 16,
    Mknod = 17,
    Unlink = 18,
    Link = 19,
    Mkdir = 20,
    Close = 21,
    Invalid = 0,
}

#[derive(Debug, Clone, Copy)]
pub enum Fn {
    U(fn(&mut Proc) -> Result<()>),    // return unit type
    I(fn(&mut Proc) -> Result<usize>), // return integer
}

impl Fn {
    pub fn call(self, p: &mut Proc) -> isize {
        match self {
            Fn::U(uni) => uni(p).map_or_else(|err| err as isize, |()| 0),
            Fn::I(int) => int(p).map_or_else(|err| err as isize, |i| i as isize),
        }
    }
}

impl SysCalls {
    pub fn entry(self) -> Option<(Fn, &'static str)> {
        Some(match self {
            Self::Pipe => (Fn::U(Self::pipe), "(p: &mut [i32; 2])"), // Create a pipe, put read/write file descriptors in p[0] and p[1].
            Self::Read => (Fn::I(Self::read), "(fd: usize, buf: &mut [u8])"), // Read n bytes into buf; returns number read; or 0 if end of file
            Self::Exec => (Fn::I(Self::exec), "(filename: &str, argv: &[*const u8])"), // Load a file and execute it with arguments; only returns if error.
            Self::Fstat => (Fn::U(Self::fstat), "(fd: usize, st: &mut Stat)"), // Place info about an open file into st.
            Self::Chdir => (Fn::U(Self::chdir), "(dirname: &str)"), // Change the current directory.
            Self::Dup => (Fn::I(Self::dup), "(fd: usize)"), // Return a new file descriptor referring to the same file as fd.
            Self::Open => (Fn::I(Self::open), "(filename: &str, flags: usize)"), // Open a file; flags indicate read/write; returns an fd.
            Self::Write => (Fn::I(Self::write), "(fd: usize, b: &[u8])"), // Write n bytes from buf to file descriptor fd; returns n.
            Self::Mknod => (Fn::U(Self::mknod), "(file: &str, mj: usize, mi: usize)"), // Create a device file
            Self::Unlink => (Fn::U(Self::unlink), "(file: &str)"), // Remove a file
            Self::Link => (Fn::U(Self::link), "(file1: &str, file2: &str)"), // Create another name (file2) for the file file1.
            Self::Mkdir => (Fn::U(Self::mkdir), "(dir: &str)"), // Create a new directory.
            Self::Close => (Fn::U(Self::close), "(fd: usize)"), // Release open file fd.
            Self::Invalid => return None,
        })
    }

    pub fn from_usize(n: usize) -> Self {
        match n {
            4 => Self::Pipe,
            5 => Self::Read,
            7 => Self::Exec,
            8 => Self::Fstat,
            9 => Self::Chdir,
            10 => Self::Dup,
            15 => Self::Open,
            16 => Self::Write,
            17 => Self::Mknod,
            18 => Self::Unlink,
            19 => Self::Link,
            20 => Self::Mkdir,
            21 => Self::Close,
            _ => Self::Invalid,
        }
    }

    pub fn fn_name(&self) -> String {
        format!("{:?}", self).to_lowercase()
    }

    pub fn signature(self) -> String {
        match self.entry() {
            Some((func, args)) => format!(
                "fn {}{} -> {}",
                self.fn_name(),
                args,
                match func {
                    Fn::I(_) => "Result<usize>",
                    Fn::U(_) => "Result<()>",
                }
            ),
            None => String::from("invalid"),
        }
    }
}

// Dispatch the system call in a7 and leave the result in a0.
pub fn syscall(p: &mut Proc) {
    let num = p.data().trapframe.a7;
    let ret = match SysCalls::from_usize(num).entry() {
        Some((func, _)) => {
            let sig = SysCalls::from_usize(num).signature();
            log::trace!("{} {}: {}", p.pid(), p.data().name, sig);
            func.call(p)
        }
        None => {
            log::warn!("{} {}: unknown sys call {}", p.pid(), p.data().name, num);
            -1
        }
    };
    p.data_mut().trapframe.a0 = ret as usize;
}

fn argraw(p: &Proc, n: usize) -> usize {
    let tf = &p.data().trapframe;
    match n {
        0 => tf.a0,
        1 => tf.a1,
        2 => tf.a2,
        3 => tf.a3,
        4 => tf.a4,
        5 => tf.a5,
        _ => panic!("arg"),
    }
}

// Fetch the usize at addr from the current process.
fn fetch_addr(p: &Proc, addr: UVAddr) -> Result<usize> {
    let mut word = [0u8; size_of::<usize>()];
    p.data().uvm.copyin(&mut word, addr)?;
    Ok(usize::from_ne_bytes(word))
}

// Fetch the nul-terminated string at addr from the current process.
// Returns length of string, not including nul.
fn fetch_str(p: &Proc, addr: UVAddr, buf: &mut [u8]) -> Result<usize> {
    p.data().uvm.copyinstr(buf, addr)
}

trait Arg {
    type In;
    type Out<'a>;
    fn from_arg<'a>(p: &Proc, n: usize, input: &'a mut Self::In) -> Result<Self::Out<'a>>;
}

impl Arg for Path {
    type In = [u8; MAXPATH];
    type Out<'a> = &'a Self;
    fn from_arg<'a>(p: &Proc, n: usize, input: &'a mut Self::In) -> Result<Self::Out<'a>> {
        let addr: UVAddr = argraw(p, n).into();
        let len = fetch_str(p, addr, input)?;
        Ok(Self::new(str::from_utf8(&input[..len]).or(Err(Utf8Error))?))
    }
}

// Argument strings of exec, copied into the kernel.
#[derive(Debug)]
struct Argv(Vec<Vec<u8>>);

impl Arg for Argv {
    type In = [u8; PGSIZE];
    type Out<'a> = Self;
    fn from_arg<'a>(p: &Proc, n: usize, input: &'a mut Self::In) -> Result<Self::Out<'a>> {
        let uargv: UVAddr = argraw(p, n).into();
        let mut argv = Vec::new();
        loop {
            if argv.len() >= MAXARG {
                return Err(InvalidArgument);
            }
            let uarg = fetch_addr(p, uargv + argv.len() * size_of::<usize>())
                .or(Err(InvalidArgument))?;
            if uarg == 0 {
                break;
            }
            let len = fetch_str(p, uarg.into(), input).or(Err(InvalidArgument))?;
            argv.push(input[..len].to_vec());
        }
        Ok(Argv(argv))
    }
}

// Fetch the nth word-sized system call argument as a file descriptor
// and check that it names an open file.
fn argfd(p: &Proc, n: usize) -> Result<usize> {
    let fd = argraw(p, n);
    match p.data().ofile.get(fd) {
        Some(Some(_)) => Ok(fd),
        _ => Err(BadFileDescriptor),
    }
}

// Allocate a file descriptor for the given file.
// Takes over file reference from caller on success.
fn fdalloc(p: &mut Proc, file: File) -> Result<usize> {
    for (fd, f) in p.data_mut().ofile.iter_mut().enumerate() {
        if f.is_none() {
            f.replace(file);
            return Ok(fd);
        }
    }
    Err(DescriptorTableFull)
}

// System Calls related to File operations
impl SysCalls {
    pub fn dup(p: &mut Proc) -> Result<usize> {
        let fd = argfd(p, 0)?;
        let f = p.data().ofile[fd].clone().ok_or(BadFileDescriptor)?;
        fdalloc(p, f)
    }

    pub fn read(p: &mut Proc) -> Result<usize> {
        let fd = argfd(p, 0)?;
        let addr: UVAddr = argraw(p, 1).into();
        let n = argraw(p, 2);
        p.data().uvm.check(addr, n)?;

        let mut buf = vec![0u8; n];
        let data = p.data_mut();
        let f = data.ofile[fd].as_mut().ok_or(BadFileDescriptor)?;
        let read = f.read(&mut buf)?;
        data.uvm.copyout(addr, &buf[..read])?;
        Ok(read)
    }

    pub fn write(p: &mut Proc) -> Result<usize> {
        let fd = argfd(p, 0)?;
        let addr: UVAddr = argraw(p, 1).into();
        let n = argraw(p, 2);
        p.data().uvm.check(addr, n)?;

        let mut buf = vec![0u8; n];
        p.data().uvm.copyin(&mut buf, addr)?;
        let f = p.data_mut().ofile[fd].as_mut().ok_or(BadFileDescriptor)?;
        f.write(&buf)
    }

    pub fn close(p: &mut Proc) -> Result<()> {
        let fd = argfd(p, 0)?;
        let _f = p.data_mut().ofile[fd].take();
        Ok(())
    }

    pub fn fstat(p: &mut Proc) -> Result<()> {
        let fd = argfd(p, 0)?;
        let st: UVAddr = argraw(p, 1).into();
        let stat = p.data().ofile[fd]
            .as_ref()
            .ok_or(BadFileDescriptor)?
            .stat()?;
        p.data_mut().uvm.copyout(st, stat.as_bytes())
    }

    pub fn link(p: &mut Proc) -> Result<()> {
        let mut old = [0; MAXPATH];
        let mut new = [0; MAXPATH];
        let old_path = Path::from_arg(p, 0, &mut old)?;
        let new_path = Path::from_arg(p, 1, &mut new)?;

        let fs = Arc::clone(p.kernel().fs());
        let _op = fs.begin_op();
        fs::link(old_path, new_path, p.data().cwd())
    }

    pub fn unlink(p: &mut Proc) -> Result<()> {
        let mut path = [0; MAXPATH];
        let path = Path::from_arg(p, 0, &mut path)?;

        let fs = Arc::clone(p.kernel().fs());
        let _op = fs.begin_op();
        fs::unlink(path, p.data().cwd())
    }

    pub fn open(p: &mut Proc) -> Result<usize> {
        let mut path = [0u8; MAXPATH];
        let path = Path::from_arg(p, 0, &mut path)?;
        let omode = OMode::from_usize(argraw(p, 1));

        // Reserve the descriptor first, so a full table never costs
        // an inode release.
        let fd = p
            .data()
            .ofile
            .iter()
            .position(Option::is_none)
            .ok_or(DescriptorTableFull)?;

        let kernel = Arc::clone(p.kernel());
        let _op = kernel.fs().begin_op();
        let f = kernel
            .ftable()
            .alloc(omode, FType::Node(path, p.data().cwd()))?;
        p.data_mut().ofile[fd].replace(f);
        Ok(fd)
    }

    pub fn mkdir(p: &mut Proc) -> Result<()> {
        let mut path = [0u8; MAXPATH];
        let path = Path::from_arg(p, 0, &mut path)?;

        let fs = Arc::clone(p.kernel().fs());
        let _op = fs.begin_op();
        let _ip = fs::create(path, p.data().cwd(), FileType::Dir, 0, 0)?;
        Ok(())
    }

    pub fn mknod(p: &mut Proc) -> Result<()> {
        let mut path = [0u8; MAXPATH];
        let path = Path::from_arg(p, 0, &mut path)?;
        let major = argraw(p, 1) as u16;
        let minor = argraw(p, 2) as u16;

        let fs = Arc::clone(p.kernel().fs());
        let _op = fs.begin_op();
        let _ip = fs::create(path, p.data().cwd(), FileType::Device, major, minor)?;
        Ok(())
    }

    pub fn chdir(p: &mut Proc) -> Result<()> {
        let mut path = [0u8; MAXPATH];
        let path = Path::from_arg(p, 0, &mut path)?;

        let fs = Arc::clone(p.kernel().fs());
        let _op = fs.begin_op();
        let (_, ip) = path.namei(p.data().cwd())?;
        if ip.lock().itype() != FileType::Dir {
            return Err(NotADirectory);
        }
        let _old = p.data_mut().cwd.replace(ip);
        Ok(())
    }

    pub fn exec(p: &mut Proc) -> Result<usize> {
        let mut path = [0u8; MAXPATH];
        let mut buf = [0u8; PGSIZE];
        let path = Path::from_arg(p, 0, &mut path)?;
        let argv = Argv::from_arg(p, 1, &mut buf)?;
        exec(p, path, &argv.0)
    }

    pub fn pipe(p: &mut Proc) -> Result<()> {
        let fdarray: UVAddr = argraw(p, 0).into();

        let ftable = Arc::clone(p.kernel().ftable());
        let (rf, wf) = Pipe::alloc(&ftable)?;
        let fd0 = fdalloc(p, rf)?;
        let fd1 = match fdalloc(p, wf) {
            Ok(fd) => fd,
            Err(err) => {
                p.data_mut().ofile[fd0].take();
                return Err(err);
            }
        };

        let fds: Vec<u8> = [fd0 as i32, fd1 as i32]
            .iter()
            .flat_map(|fd| fd.to_ne_bytes())
            .collect();
        let data = p.data_mut();
        if data.uvm.copyout(fdarray, &fds).is_err() {
            data.ofile[fd0].take();
            data.ofile[fd1].take();
            return Err(BadVirtAddr);
        }
        Ok(())
    }
}
