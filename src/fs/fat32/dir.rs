//! Directory `VnodeOps`: 8.3 short-name lookup, linear scan readdir, and
//! entry allocation on create/mkdir/unlink.
//!
//! No long-name (VFAT) support, per the specification: entries tagged
//! `ATTR_LONG_NAME` are skipped rather than assembled into a long name.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec;
use core::ops::ControlFlow;

use fat32_fmt::{DirEntry, ShortName, ATTR_ARCHIVE, ATTR_DIRECTORY, DIR_ENTRY_FREE, DIR_ENTRY_SIZE};

use super::file::FileVnode;
use super::Fat32Fs;
use crate::kernel::vfs::vnode::{new_vnode, Attr, DirEntryInfo, Vnode, VnodeOps, VnodeType};
use crate::prelude::*;

pub struct DirVnode {
    fs: Arc<Fat32Fs>,
    first_cluster: u32,
}

impl DirVnode {
    pub fn new(fs: Arc<Fat32Fs>, first_cluster: u32) -> Self {
        Self { fs, first_cluster }
    }

    fn entries_per_cluster(&self) -> usize {
        self.fs.cluster_size() / DIR_ENTRY_SIZE
    }

    /// Visit every non-end entry of the directory in on-disk order,
    /// stopping early on `ControlFlow::Break`. Entries beyond the first
    /// `DIR_ENTRY_END` marker are never allocated in a well-formed
    /// directory, so hitting one ends the walk.
    fn walk_entries<R>(
        &self,
        mut visit: impl FnMut(u32, usize, [u8; DIR_ENTRY_SIZE]) -> KResult<ControlFlow<R>>,
    ) -> KResult<Option<R>> {
        let per_cluster = self.entries_per_cluster();
        let mut cluster = self.first_cluster;
        let mut buf = vec![0u8; self.fs.cluster_size()];

        loop {
            self.fs.read_cluster(cluster, &mut buf)?;
            for idx in 0..per_cluster {
                let off = idx * DIR_ENTRY_SIZE;
                let raw: [u8; DIR_ENTRY_SIZE] = buf[off..off + DIR_ENTRY_SIZE].try_into().unwrap();
                if DirEntry::is_end(&raw) {
                    return Ok(None);
                }
                if let ControlFlow::Break(r) = visit(cluster, idx, raw)? {
                    return Ok(Some(r));
                }
            }

            let next = self.fs.fat.lock().get(cluster)?;
            if fat32_fmt::is_eoc(next) {
                return Ok(None);
            }
            cluster = next;
        }
    }

    fn find_named(&self, name: &str) -> KResult<Option<(u32, usize, DirEntry)>> {
        let target = ShortName::encode(name);
        self.walk_entries(|cluster, idx, raw| {
            if DirEntry::is_free(&raw) || DirEntry::is_long_name(&raw) {
                return Ok(ControlFlow::Continue(()));
            }
            let entry = DirEntry::parse(&raw);
            if entry.short_name == target {
                return Ok(ControlFlow::Break((cluster, idx, entry)));
            }
            Ok(ControlFlow::Continue(()))
        })
    }

    /// Find a reusable (freed or never-allocated) slot, extending the
    /// directory's cluster chain by one zeroed cluster if every existing
    /// slot is occupied.
    fn find_free_slot(&self) -> KResult<(u32, usize)> {
        let per_cluster = self.entries_per_cluster();
        let mut cluster = self.first_cluster;
        let mut buf = vec![0u8; self.fs.cluster_size()];

        loop {
            self.fs.read_cluster(cluster, &mut buf)?;
            for idx in 0..per_cluster {
                let off = idx * DIR_ENTRY_SIZE;
                if buf[off] == DIR_ENTRY_FREE || buf[off] == fat32_fmt::DIR_ENTRY_END {
                    return Ok((cluster, idx));
                }
            }

            let next = self.fs.fat.lock().get(cluster)?;
            if fat32_fmt::is_eoc(next) {
                let new_cluster = self.fs.extend_chain(cluster)?;
                return Ok((new_cluster, 0));
            }
            cluster = next;
        }
    }

    fn write_raw_entry(&self, cluster: u32, idx: usize, raw: &[u8; DIR_ENTRY_SIZE]) -> KResult<()> {
        let mut buf = vec![0u8; self.fs.cluster_size()];
        self.fs.read_cluster(cluster, &mut buf)?;
        let off = idx * DIR_ENTRY_SIZE;
        buf[off..off + DIR_ENTRY_SIZE].copy_from_slice(raw);
        self.fs.write_cluster(cluster, &buf)
    }

    fn is_empty_dir(&self, first_cluster: u32) -> KResult<bool> {
        if first_cluster == 0 {
            return Ok(true);
        }
        let child = DirVnode::new(self.fs.clone(), first_cluster);
        let extra = child.walk_entries(|_, _, raw| {
            if DirEntry::is_free(&raw) || DirEntry::is_long_name(&raw) {
                return Ok(ControlFlow::Continue(()));
            }
            let entry = DirEntry::parse(&raw);
            let name = entry.short_name;
            if name == ShortName::DOT || name == ShortName::DOTDOT {
                Ok(ControlFlow::Continue(()))
            } else {
                Ok(ControlFlow::Break(()))
            }
        })?;
        Ok(extra.is_none())
    }

    /// A directory entry's `first_cluster` is dangling if it's nonzero but
    /// doesn't name a cluster actually in use (FREE, BAD, or out of
    /// range) — e.g. a FAT corrupted after the entry was written. Per the
    /// conservative recovery policy, such a file is surfaced as
    /// zero-length rather than propagating the corruption to callers.
    fn first_cluster_is_dangling(&self, first_cluster: u32) -> bool {
        if first_cluster == 0 {
            return false;
        }
        match self.fs.fat.lock().get(first_cluster) {
            Ok(entry) => {
                let entry = entry & fat32_fmt::FAT_ENTRY_MASK;
                !(fat32_fmt::is_allocatable(entry, self.fs.total_clusters) || fat32_fmt::is_eoc(entry))
            }
            Err(_) => true,
        }
    }

    fn child_vnode(&self, name: &str, dir_cluster: u32, dir_index: usize, entry: DirEntry) -> Vnode {
        if entry.is_directory() {
            new_vnode(name, Box::new(DirVnode::new(self.fs.clone(), entry.first_cluster)))
        } else if self.first_cluster_is_dangling(entry.first_cluster) {
            self.fs.mark_error();
            new_vnode(name, Box::new(FileVnode::new(self.fs.clone(), 0, 0, dir_cluster, dir_index)))
        } else {
            new_vnode(
                name,
                Box::new(FileVnode::new(self.fs.clone(), entry.first_cluster, entry.file_size as u64, dir_cluster, dir_index)),
            )
        }
    }
}

impl VnodeOps for DirVnode {
    fn vnode_type(&self) -> VnodeType {
        VnodeType::Dir
    }

    fn lookup(&self, name: &str) -> KResult<Vnode> {
        let _guard = self.fs.op_lock.lock();
        match self.find_named(name)? {
            Some((cluster, idx, entry)) => Ok(self.child_vnode(name, cluster, idx, entry)),
            None => Err(Error::NotFound),
        }
    }

    fn create(&self, name: &str) -> KResult<Vnode> {
        let _guard = self.fs.op_lock.lock();
        if self.find_named(name)?.is_some() {
            return Err(Error::AlreadyExists);
        }

        let (cluster, idx) = self.find_free_slot()?;
        let (write_date, write_time) = fat32_fmt::dos_datetime(1980, 1, 1, 0, 0, 0);
        let entry = DirEntry {
            short_name: ShortName::encode(name),
            attributes: ATTR_ARCHIVE,
            first_cluster: 0,
            file_size: 0,
            write_date,
            write_time,
        };
        self.write_raw_entry(cluster, idx, &entry.to_bytes())?;
        Ok(new_vnode(name, Box::new(FileVnode::new(self.fs.clone(), 0, 0, cluster, idx))))
    }

    fn mkdir(&self, name: &str) -> KResult<Vnode> {
        let _guard = self.fs.op_lock.lock();
        if let Some((cluster, idx, entry)) = self.find_named(name)? {
            return if entry.is_directory() {
                Ok(self.child_vnode(name, cluster, idx, entry))
            } else {
                Err(Error::AlreadyExists)
            };
        }

        let new_cluster = self.fs.allocate_zeroed_cluster()?;
        let parent_cluster_for_dotdot = if self.first_cluster == self.fs.root_cluster { 0 } else { self.first_cluster };

        let mut buf = vec![0u8; self.fs.cluster_size()];
        let dot = DirEntry {
            short_name: ShortName::DOT,
            attributes: ATTR_DIRECTORY,
            first_cluster: new_cluster,
            file_size: 0,
            write_date: 0,
            write_time: 0,
        };
        let dotdot = DirEntry {
            short_name: ShortName::DOTDOT,
            attributes: ATTR_DIRECTORY,
            first_cluster: parent_cluster_for_dotdot,
            file_size: 0,
            write_date: 0,
            write_time: 0,
        };
        buf[0..DIR_ENTRY_SIZE].copy_from_slice(&dot.to_bytes());
        buf[DIR_ENTRY_SIZE..2 * DIR_ENTRY_SIZE].copy_from_slice(&dotdot.to_bytes());
        self.fs.write_cluster(new_cluster, &buf)?;

        let (cluster, idx) = self.find_free_slot()?;
        let (write_date, write_time) = fat32_fmt::dos_datetime(1980, 1, 1, 0, 0, 0);
        let entry = DirEntry {
            short_name: ShortName::encode(name),
            attributes: ATTR_DIRECTORY,
            first_cluster: new_cluster,
            file_size: 0,
            write_date,
            write_time,
        };
        self.write_raw_entry(cluster, idx, &entry.to_bytes())?;
        Ok(new_vnode(name, Box::new(DirVnode::new(self.fs.clone(), new_cluster))))
    }

    fn readdir(&self, index: usize) -> KResult<Option<DirEntryInfo>> {
        let _guard = self.fs.op_lock.lock();
        let mut seen = 0usize;
        self.walk_entries(|_cluster, _idx, raw| {
            if DirEntry::is_free(&raw) || DirEntry::is_long_name(&raw) {
                return Ok(ControlFlow::Continue(()));
            }
            let entry = DirEntry::parse(&raw);
            if seen == index {
                let info = DirEntryInfo {
                    name: entry.short_name.display(),
                    vtype: if entry.is_directory() { VnodeType::Dir } else { VnodeType::File },
                };
                return Ok(ControlFlow::Break(info));
            }
            seen += 1;
            Ok(ControlFlow::Continue(()))
        })
    }

    fn unlink(&self, name: &str) -> KResult<()> {
        let _guard = self.fs.op_lock.lock();
        let (cluster, idx, entry) = self.find_named(name)?.ok_or(Error::NotFound)?;

        if entry.is_directory() && !self.is_empty_dir(entry.first_cluster)? {
            return Err(Error::DirectoryNotEmpty);
        }

        if entry.first_cluster != 0 {
            self.fs.free_chain(entry.first_cluster)?;
        }

        let mut raw = entry.to_bytes();
        raw[0] = DIR_ENTRY_FREE;
        self.write_raw_entry(cluster, idx, &raw)
    }

    fn getattr(&self) -> Attr {
        Attr::default()
    }
}

/// Patch the first-cluster and size fields of a single directory entry in
/// place, used by [`super::file::FileVnode`] when a write grows the file or
/// a truncate shrinks it. Directory entries track neither for the
/// directory itself (FAT32 leaves `file_size` zero for subdirectories).
pub(super) fn update_dir_entry(fs: &Fat32Fs, dir_cluster: u32, dir_index: usize, first_cluster: u32, file_size: u32) -> KResult<()> {
    let mut buf = vec![0u8; fs.cluster_size()];
    fs.read_cluster(dir_cluster, &mut buf)?;
    let off = dir_index * DIR_ENTRY_SIZE;
    let raw: [u8; DIR_ENTRY_SIZE] = buf[off..off + DIR_ENTRY_SIZE].try_into().unwrap();
    let mut entry = DirEntry::parse(&raw);
    entry.first_cluster = first_cluster;
    entry.file_size = file_size;
    buf[off..off + DIR_ENTRY_SIZE].copy_from_slice(&entry.to_bytes());
    fs.write_cluster(dir_cluster, &buf)
}
