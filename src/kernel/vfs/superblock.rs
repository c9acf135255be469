//! Superblock: filesystem-instance state, owning a root vnode.
//!
//! `Arc<Superblock>` stands in for the spec's explicit refcount field: a
//! single instance can back multiple mount points (bind mounts, or
//! repeated mounts of the same device), and it is freed exactly when the
//! last `Arc` drops — "freed when refcount reaches 0" from §4.4.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;

use bitflags::bitflags;

use super::vnode::Vnode;
use crate::prelude::KResult;

bitflags! {
    #[derive(Clone, Copy, Debug)]
    pub struct SuperblockFlags: u32 {
        const BIND = 0x1;
        const RECURSIVE = 0x2;
    }
}

pub struct BindSource {
    pub source: Arc<Superblock>,
    pub relpath: String,
}

pub struct Superblock {
    pub name: &'static str,
    pub root: Vnode,
    pub flags: SuperblockFlags,
    pub bind_source: Option<BindSource>,
    /// Filesystem-specific "put_super": flushes cached metadata back to the
    /// device. Called on unmount; `None` for filesystems with no cache to
    /// flush (devfs, bind mounts).
    sync_hook: Option<Box<dyn Fn() -> KResult<()> + Send + Sync>>,
}

impl Superblock {
    pub fn new(name: &'static str, root: Vnode) -> Arc<Self> {
        Arc::new(Self {
            name,
            root,
            flags: SuperblockFlags::empty(),
            bind_source: None,
            sync_hook: None,
        })
    }

    /// Like [`Superblock::new`], but registers a callback invoked on
    /// unmount to flush filesystem-specific caches (e.g. FAT32's FSInfo and
    /// dirty FAT sector).
    pub fn new_with_sync(
        name: &'static str,
        root: Vnode,
        sync_hook: Box<dyn Fn() -> KResult<()> + Send + Sync>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name,
            root,
            flags: SuperblockFlags::empty(),
            bind_source: None,
            sync_hook: Some(sync_hook),
        })
    }

    pub fn new_bind(root: Vnode, source: Arc<Superblock>, relpath: String, recursive: bool) -> Arc<Self> {
        let mut flags = SuperblockFlags::BIND;
        if recursive {
            flags |= SuperblockFlags::RECURSIVE;
        }
        Arc::new(Self {
            name: "bind",
            root,
            flags,
            bind_source: Some(BindSource { source, relpath }),
            sync_hook: None,
        })
    }

    pub fn sync(&self) -> KResult<()> {
        match &self.sync_hook {
            Some(hook) => hook(),
            None => Ok(()),
        }
    }
}
