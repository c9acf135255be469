//! Mount table: registered filesystem types plus the list of active mount
//! points, with longest-prefix resolution delegated to the host-testable
//! [`kpath`] crate.
//!
//! Grounded on the reference kernel's `kernel/vfs/mount.rs`
//! (`MOUNT_CREATORS`/`MountCreator` registry, `register_filesystem`), with
//! the registry keyed by filesystem name the same way. The spec calls for
//! the mount table itself to be "a linked list of mount entries"; a `Vec`
//! models that list (push-to-front on mount, linear scan on lookup) without
//! the unsafety of a hand-rolled intrusive list for a structure this small.

use alloc::boxed::Box;
use alloc::collections::btree_map::BTreeMap;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;

use super::superblock::Superblock;
use super::vnode::Vnode;
use crate::prelude::*;

pub trait MountCreator: Send + Sync {
    fn mount(&self, device: Option<&str>) -> KResult<Arc<Superblock>>;
}

struct MountEntry {
    mountpoint: String,
    superblock: Arc<Superblock>,
    fstype: String,
    device: Option<String>,
}

struct MountTable {
    creators: BTreeMap<String, Box<dyn MountCreator>>,
    mounts: Vec<MountEntry>,
}

lazy_static::lazy_static! {
    static ref TABLE: Mutex<MountTable> = Mutex::new(MountTable {
        creators: BTreeMap::new(),
        mounts: Vec::new(),
    });
}

pub fn register_filesystem(name: &str, creator: Box<dyn MountCreator>) -> KResult<()> {
    let mut table = TABLE.lock();
    if table.creators.contains_key(name) {
        return Err(Error::AlreadyExists);
    }
    table.creators.insert(name.to_string(), creator);
    Ok(())
}

pub fn mount(fstype: &str, device: Option<&str>, mountpoint: &str) -> KResult<()> {
    let mountpoint = kpath::normalize(mountpoint);
    let mut table = TABLE.lock();

    if table.mounts.iter().any(|m| m.mountpoint == mountpoint) {
        return Err(Error::AlreadyExists);
    }

    // A device already backing another mount point is reused rather than
    // remounted: the two mount points share one superblock instance and
    // its `Arc` refcount carries the "how many mount points" count.
    let existing = device.and_then(|dev| {
        table.mounts.iter().find(|m| m.fstype == fstype && m.device.as_deref() == Some(dev))
    });

    let superblock = match existing {
        Some(entry) => entry.superblock.clone(),
        None => table.creators.get(fstype).ok_or(Error::Unsupported)?.mount(device)?,
    };

    table.mounts.insert(0, MountEntry {
        mountpoint,
        superblock,
        fstype: fstype.to_string(),
        device: device.map(String::from),
    });
    Ok(())
}

pub fn bind_mount(source: &str, target: &str, recursive: bool) -> KResult<()> {
    let source_vnode = resolve(source)?;
    if !source_vnode.is_dir() {
        return Err(Error::NotADirectory);
    }

    let (source_sb, source_relpath) = {
        let mountpoints = mountpoint_strings();
        let normalized_source = kpath::normalize(source);
        let (idx, rel) = kpath::find_mount(&mountpoints, &normalized_source).ok_or(Error::NotFound)?;
        let table = TABLE.lock();
        (table.mounts[idx].superblock.clone(), rel)
    };

    let bind_ops = super::devfs::BindVnodeOps::new(source_vnode.clone());
    let root = super::vnode::new_vnode(source_vnode.name.clone(), alloc::boxed::Box::new(bind_ops));
    let superblock = Superblock::new_bind(root, source_sb, source_relpath, recursive);

    let target = kpath::normalize(target);
    let mut table = TABLE.lock();
    if table.mounts.iter().any(|m| m.mountpoint == target) {
        return Err(Error::AlreadyExists);
    }
    table.mounts.insert(0, MountEntry {
        mountpoint: target,
        superblock,
        fstype: "bind".to_string(),
        device: None,
    });
    Ok(())
}

/// Refuses with `Busy` if any open FD currently points into this mount
/// (checked by the caller via [`super::fd`] before removing the entry).
pub fn unmount(mountpoint: &str) -> KResult<()> {
    let mountpoint = kpath::normalize(mountpoint);
    if mountpoint == "/" {
        return Err(Error::Busy);
    }

    let superblock = {
        let table = TABLE.lock();
        table
            .mounts
            .iter()
            .find(|m| m.mountpoint == mountpoint)
            .map(|m| m.superblock.clone())
            .ok_or(Error::NotFound)?
    };

    if super::fd::any_fd_under(&superblock) {
        return Err(Error::Busy);
    }

    superblock.sync()?;

    let mut table = TABLE.lock();
    table.mounts.retain(|m| m.mountpoint != mountpoint);
    Ok(())
}

fn mountpoint_strings() -> Vec<String> {
    TABLE.lock().mounts.iter().map(|m| m.mountpoint.clone()).collect()
}

/// Longest-prefix mount lookup for `path`, returning the covering
/// superblock and the path relative to its mountpoint.
pub fn find_mount_for_path(path: &str) -> KResult<(Arc<Superblock>, String)> {
    let normalized = kpath::normalize(path);
    let mountpoints = mountpoint_strings();
    let refs: Vec<&str> = mountpoints.iter().map(String::as_str).collect();
    let (idx, rel) = kpath::find_mount(&refs, &normalized).ok_or(Error::NotFound)?;
    let table = TABLE.lock();
    Ok((table.mounts[idx].superblock.clone(), rel))
}

/// Walk `path` from its covering mount's root vnode to the target vnode.
pub fn resolve(path: &str) -> KResult<Vnode> {
    let (superblock, relpath) = find_mount_for_path(path)?;
    let mut current = superblock.root.clone();
    for component in kpath::components(&relpath) {
        current = current.lookup(component)?;
    }
    Ok(current)
}

/// Resolve the parent directory vnode and final path component of `path`,
/// for operations (`create`, `mkdir`, `unlink`) that act on a name within
/// a directory rather than on an existing vnode.
pub fn resolve_parent(path: &str) -> KResult<(Vnode, String)> {
    let (parent_path, name) = kpath::split_parent(path);
    let parent = resolve(&parent_path)?;
    if !parent.is_dir() {
        return Err(Error::NotADirectory);
    }
    Ok((parent, name))
}
