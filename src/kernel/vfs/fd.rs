//! Fixed-size file descriptor table (§4.4): each entry holds a refcounted
//! vnode handle, open flags and a byte offset; closing drops the vnode
//! handle, potentially triggering `release` at refcount zero.

use alloc::sync::Arc;

use super::superblock::Superblock;
use super::vnode::Vnode;
use crate::prelude::*;

pub const VFS_MAX_FDS: usize = 256;

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug)]
    pub struct OpenFlags: u32 {
        const RDONLY = 0x0;
        const WRONLY = 0x1;
        const RDWR = 0x2;
        const CREAT = 0x4;
        const TRUNC = 0x8;
        const APPEND = 0x10;
    }
}

struct FdEntry {
    vnode: Vnode,
    superblock: Arc<Superblock>,
    flags: OpenFlags,
    offset: u64,
}

static TABLE: Mutex<[Option<FdEntry>; VFS_MAX_FDS]> = Mutex::new([const { None }; VFS_MAX_FDS]);

pub fn install(vnode: Vnode, superblock: Arc<Superblock>, flags: OpenFlags) -> KResult<u32> {
    let mut table = TABLE.lock();
    let slot = table.iter().position(Option::is_none).ok_or(Error::NoSpace)?;
    table[slot] = Some(FdEntry { vnode, superblock, flags, offset: 0 });
    Ok(slot as u32)
}

pub fn close(fd: u32) -> KResult<()> {
    let mut table = TABLE.lock();
    let slot = table.get_mut(fd as usize).ok_or(Error::InvalidArgument)?;
    if slot.take().is_none() {
        return Err(Error::InvalidArgument);
    }
    Ok(())
}

pub fn read(fd: u32, buf: &mut [u8]) -> KResult<usize> {
    let mut table = TABLE.lock();
    let entry = table.get_mut(fd as usize).and_then(Option::as_mut).ok_or(Error::InvalidArgument)?;
    let n = entry.vnode.read(entry.offset, buf)?;
    entry.offset += n as u64;
    Ok(n)
}

pub fn write(fd: u32, buf: &[u8]) -> KResult<usize> {
    let mut table = TABLE.lock();
    let entry = table.get_mut(fd as usize).and_then(Option::as_mut).ok_or(Error::InvalidArgument)?;
    if entry.flags.contains(OpenFlags::APPEND) {
        entry.offset = entry.vnode.getattr().size;
    }
    let n = entry.vnode.write(entry.offset, buf)?;
    entry.offset += n as u64;
    Ok(n)
}

pub fn seek(fd: u32, offset: u64) -> KResult<()> {
    let mut table = TABLE.lock();
    let entry = table.get_mut(fd as usize).and_then(Option::as_mut).ok_or(Error::InvalidArgument)?;
    entry.offset = offset;
    Ok(())
}

/// Used by `unmount` to refuse while any FD still points under `superblock`.
pub fn any_fd_under(superblock: &Arc<Superblock>) -> bool {
    let table = TABLE.lock();
    table.iter().flatten().any(|entry| Arc::ptr_eq(&entry.superblock, superblock))
}
