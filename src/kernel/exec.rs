use crate::{
    elf::ElfHdr,
    error::{Error::*, Result},
    fs::{Inode, Path},
    param::{MAXARG, PGSIZE},
    proc::Proc,
    stat::FileType,
    vm::{pgroundup, UVAddr, Uvm},
};
use core::mem::size_of;
use std::sync::Arc;
use zerocopy::FromBytes;

// Read the whole executable named by path.
// Must be called inside a transaction.
fn load(path: &Path, cwd: &Inode) -> Result<(ElfHdr, Vec<u8>)> {
    let (_, ip) = path.namei(cwd)?;
    let ip_guard = ip.lock();
    if ip_guard.itype() != FileType::File {
        return Err(ExecFileFormatError);
    }

    let mut image = vec![0u8; ip_guard.size() as usize];
    let n = ip_guard.read(0, &mut image)?;
    image.truncate(n);

    // Check ELF header
    let elf = ElfHdr::read_from_prefix(&image).ok_or(ExecFileFormatError)?;
    if !elf.is_valid() {
        return Err(ExecFileFormatError);
    }
    Ok((elf, image))
}

// Push bytes onto the user stack, keeping sp 16-byte aligned.
fn push(uvm: &mut Uvm, sp: &mut UVAddr, stackbase: UVAddr, bytes: &[u8]) -> Result<()> {
    let room = sp.into_usize() - stackbase.into_usize();
    if bytes.len() > room {
        return Err(InvalidArgument);
    }
    *sp -= bytes.len();
    *sp -= sp.into_usize() % 16; // riscv sp must be 16-byte aligned
    if *sp < stackbase {
        return Err(InvalidArgument);
    }
    uvm.copyout(*sp, bytes)
}

// Replace the user image of p with the program at path.
// argv has already been copied into the kernel.
// Returns argc, which the caller places in a0.
// Nothing about p changes unless every step succeeds.
pub fn exec(p: &mut Proc, path: &Path, argv: &[Vec<u8>]) -> Result<usize> {
    if argv.len() >= MAXARG {
        return Err(InvalidArgument);
    }

    let fs = Arc::clone(p.kernel().fs());
    let (elf, image) = {
        let _op = fs.begin_op();
        load(path, p.data().cwd())?
    };

    // The program occupies [0, sz), followed by one page of user stack.
    let sz = pgroundup(image.len()) + PGSIZE;
    let mut mem = image;
    mem.resize(sz, 0);
    let mut uvm = Uvm::from_image(mem);
    let mut sp = UVAddr::from(sz);
    let stackbase = sp - PGSIZE;

    // Push argument strings, prepare rest of stack in ustack.
    let mut ustack = [0usize; MAXARG];
    for (argc, arg) in argv.iter().enumerate() {
        let mut s = arg.clone();
        s.push(0);
        push(&mut uvm, &mut sp, stackbase, &s)?;
        ustack[argc] = sp.into_usize();
    }
    let argc = argv.len();
    ustack[argc] = 0;

    // push the array of argv[] pointers.
    let words: Vec<u8> = ustack[..=argc]
        .iter()
        .flat_map(|w| w.to_ne_bytes())
        .collect();
    debug_assert_eq!(words.len(), (argc + 1) * size_of::<usize>());
    push(&mut uvm, &mut sp, stackbase, &words)?;

    // Commit to the user image.
    let data = p.data_mut();
    // arguments to user main(argc, argv)
    // argc is returned via the system call return value, which goes in a0.
    data.trapframe.a1 = sp.into_usize();
    data.trapframe.epc = elf.e_entry as usize; // initial program counter = main
    data.trapframe.sp = sp.into_usize(); // initial stack pointer
    data.uvm = uvm;

    // Save program name for debugging.
    if let Some(name) = path.file_name() {
        data.name = name.to_string();
    }
    log::debug!("exec: {} argc {} sz {}", data.name, argc, sz);

    Ok(argc)
}
