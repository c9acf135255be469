pub mod devfs;
pub mod fd;
pub mod mount;
pub mod superblock;
pub mod vnode;

use alloc::string::String;

pub use fd::OpenFlags;
pub use vnode::{Vnode, VnodeType};

use crate::prelude::*;

pub const VFS_NAME_MAX: usize = 255;

/// `open(path, O_CREAT|...)`: with `CREAT` set this is exclusive-create —
/// it always creates the name fresh in its parent directory and fails with
/// `AlreadyExists` if one is already there, never silently reopening it.
/// Without `CREAT` it just resolves `path`. Returns a process-wide FD.
pub fn open(path: &str, flags: OpenFlags) -> KResult<u32> {
    let (superblock, _) = mount::find_mount_for_path(path)?;

    let vnode = if flags.contains(OpenFlags::CREAT) {
        let (parent, name) = mount::resolve_parent(path)?;
        parent.create(&name)?
    } else {
        mount::resolve(path)?
    };

    if vnode.is_dir() {
        return Err(Error::IsADirectory);
    }
    if flags.contains(OpenFlags::TRUNC) {
        vnode.truncate(0)?;
    }

    fd::install(vnode, superblock, flags)
}

pub fn close(fd: u32) -> KResult<()> {
    fd::close(fd)
}

pub fn read(fd: u32, buf: &mut [u8]) -> KResult<usize> {
    fd::read(fd, buf)
}

pub fn write(fd: u32, buf: &[u8]) -> KResult<usize> {
    fd::write(fd, buf)
}

/// Create `path` as a directory, creating any missing ancestor along the
/// way (like `mkdir -p`). Idempotent: succeeds with no error if `path`
/// already names a directory.
pub fn mkdir(path: &str) -> KResult<()> {
    let (superblock, relpath) = mount::find_mount_for_path(path)?;
    let mut current = superblock.root.clone();

    for component in kpath::components(&relpath) {
        current = match current.lookup(component) {
            Ok(vnode) => vnode,
            Err(Error::NotFound) => current.mkdir(component)?,
            Err(e) => return Err(e),
        };
    }

    if !current.is_dir() {
        return Err(Error::AlreadyExists);
    }
    Ok(())
}

pub fn unlink(path: &str) -> KResult<()> {
    let (parent, name) = mount::resolve_parent(path)?;
    parent.unlink(&name)
}

pub struct ReadDirEntry {
    pub name: String,
    pub vtype: VnodeType,
}

pub fn readdir(path: &str) -> KResult<alloc::vec::Vec<ReadDirEntry>> {
    let vnode = mount::resolve(path)?;
    let mut entries = alloc::vec::Vec::new();
    let mut index = 0;
    while let Some(entry) = vnode.readdir(index)? {
        entries.push(ReadDirEntry { name: entry.name, vtype: entry.vtype });
        index += 1;
    }
    Ok(entries)
}

pub fn init() -> KResult<()> {
    devfs::register()?;
    crate::fs::fat32::register()?;
    mount::mount("fat32", Some("ide0"), "/")?;
    mount::mount("devfs", None, "/dev")?;
    Ok(())
}
