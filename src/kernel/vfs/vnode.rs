//! Vnode: an in-memory handle to a filesystem object.
//!
//! Grounded on the reference kernel's `Inode`/`Dentry` split
//! (`kernel/vfs/inode.rs`, `kernel/vfs/dentry.rs`), collapsed into one type
//! since the specification's vnode has no separate name-cache layer. Each
//! lookup allocates a fresh [`Vnode`] (an `Arc` around the shared state);
//! refcounting is exactly `Arc`'s own strong count, so `release` on the
//! underlying `VnodeOps` fires from `VnodeShared`'s `Drop` impl precisely
//! when the last handle goes away — the spec's "refcount reaches zero
//! implies release" invariant, for free.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;

use crate::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VnodeType {
    File,
    Dir,
    Symlink,
    CharDev,
    BlockDev,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Attr {
    pub size: u64,
}

pub struct DirEntryInfo {
    pub name: String,
    pub vtype: VnodeType,
}

/// Per-filesystem operations a vnode dispatches to. Implemented once per
/// filesystem (FAT32, devfs, bind-mount wrapper).
pub trait VnodeOps: Send + Sync {
    fn vnode_type(&self) -> VnodeType;
    fn read(&self, _offset: u64, _buf: &mut [u8]) -> KResult<usize> {
        Err(Error::Unsupported)
    }
    fn write(&self, _offset: u64, _buf: &[u8]) -> KResult<usize> {
        Err(Error::Unsupported)
    }
    fn lookup(&self, _name: &str) -> KResult<Vnode> {
        Err(Error::NotADirectory)
    }
    fn create(&self, _name: &str) -> KResult<Vnode> {
        Err(Error::Unsupported)
    }
    fn mkdir(&self, _name: &str) -> KResult<Vnode> {
        Err(Error::Unsupported)
    }
    fn readdir(&self, _index: usize) -> KResult<Option<DirEntryInfo>> {
        Err(Error::NotADirectory)
    }
    fn unlink(&self, _name: &str) -> KResult<()> {
        Err(Error::Unsupported)
    }
    fn symlink(&self, _name: &str, _target: &str) -> KResult<Vnode> {
        Err(Error::Unsupported)
    }
    fn readlink(&self) -> KResult<String> {
        Err(Error::Unsupported)
    }
    fn truncate(&self, _size: u64) -> KResult<()> {
        Err(Error::Unsupported)
    }
    fn getattr(&self) -> Attr {
        Attr::default()
    }
    /// Called exactly once, when the last handle to this vnode is dropped.
    fn release(&self) {}
}

pub struct VnodeShared {
    pub name: String,
    ops: Box<dyn VnodeOps>,
}

impl Drop for VnodeShared {
    fn drop(&mut self) {
        self.ops.release();
    }
}

pub type Vnode = Arc<VnodeShared>;

pub fn new_vnode(name: impl Into<String>, ops: Box<dyn VnodeOps>) -> Vnode {
    Arc::new(VnodeShared { name: name.into(), ops })
}

impl VnodeShared {
    pub fn vnode_type(&self) -> VnodeType {
        self.ops.vnode_type()
    }
    pub fn is_dir(&self) -> bool {
        self.vnode_type() == VnodeType::Dir
    }
    pub fn read(&self, offset: u64, buf: &mut [u8]) -> KResult<usize> {
        self.ops.read(offset, buf)
    }
    pub fn write(&self, offset: u64, buf: &[u8]) -> KResult<usize> {
        self.ops.write(offset, buf)
    }
    pub fn lookup(&self, name: &str) -> KResult<Vnode> {
        if !self.is_dir() {
            return Err(Error::NotADirectory);
        }
        self.ops.lookup(name)
    }
    pub fn create(&self, name: &str) -> KResult<Vnode> {
        if !self.is_dir() {
            return Err(Error::NotADirectory);
        }
        self.ops.create(name)
    }
    pub fn mkdir(&self, name: &str) -> KResult<Vnode> {
        if !self.is_dir() {
            return Err(Error::NotADirectory);
        }
        self.ops.mkdir(name)
    }
    pub fn readdir(&self, index: usize) -> KResult<Option<DirEntryInfo>> {
        if !self.is_dir() {
            return Err(Error::NotADirectory);
        }
        self.ops.readdir(index)
    }
    pub fn unlink(&self, name: &str) -> KResult<()> {
        if !self.is_dir() {
            return Err(Error::NotADirectory);
        }
        self.ops.unlink(name)
    }
    pub fn symlink(&self, name: &str, target: &str) -> KResult<Vnode> {
        if !self.is_dir() {
            return Err(Error::NotADirectory);
        }
        self.ops.symlink(name, target)
    }
    pub fn readlink(&self) -> KResult<String> {
        if self.vnode_type() != VnodeType::Symlink {
            return Err(Error::InvalidArgument);
        }
        self.ops.readlink()
    }
    pub fn truncate(&self, size: u64) -> KResult<()> {
        self.ops.truncate(size)
    }
    pub fn getattr(&self) -> Attr {
        self.ops.getattr()
    }
}
