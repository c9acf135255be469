//! Regular file `VnodeOps`: cluster-chain-backed read/write/truncate.
//!
//! Every read and write is a read-modify-write of whole clusters through
//! [`Fat32Fs::read_cluster`]/`write_cluster` — there is no page cache, per
//! the specification's "read/write go straight to disk" design note.

use alloc::sync::Arc;
use alloc::vec;

use super::dir::update_dir_entry;
use super::Fat32Fs;
use crate::kernel::vfs::vnode::{Attr, VnodeOps, VnodeType};
use crate::prelude::*;

/// A single `write` call is rejected above this many bytes, bounding the
/// scratch-buffer and chain-extension work one call can trigger.
const MAX_WRITE_SIZE: usize = 64 * 1024;

struct FileState {
    first_cluster: u32,
    size: u64,
    dir_cluster: u32,
    dir_index: usize,
}

pub struct FileVnode {
    fs: Arc<Fat32Fs>,
    state: Mutex<FileState>,
}

impl FileVnode {
    pub fn new(fs: Arc<Fat32Fs>, first_cluster: u32, size: u64, dir_cluster: u32, dir_index: usize) -> Self {
        Self { fs, state: Mutex::new(FileState { first_cluster, size, dir_cluster, dir_index }) }
    }

    fn cluster_at(&self, first_cluster: u32, index: u64) -> KResult<Option<u32>> {
        let mut cluster = first_cluster;
        if cluster == 0 {
            return Ok(None);
        }
        for _ in 0..index {
            let next = self.fs.fat.lock().get(cluster)?;
            if fat32_fmt::is_eoc(next) {
                return Ok(None);
            }
            cluster = next;
        }
        Ok(Some(cluster))
    }

    fn persist_metadata(&self, state: &FileState) -> KResult<()> {
        update_dir_entry(&self.fs, state.dir_cluster, state.dir_index, state.first_cluster, state.size as u32)
    }
}

impl VnodeOps for FileVnode {
    fn vnode_type(&self) -> VnodeType {
        VnodeType::File
    }

    fn read(&self, offset: u64, buf: &mut [u8]) -> KResult<usize> {
        let _guard = self.fs.op_lock.lock();
        let state = self.state.lock();
        if offset >= state.size {
            return Ok(0);
        }

        let cluster_size = self.fs.cluster_size() as u64;
        let to_read = buf.len().min((state.size - offset) as usize);
        let mut done = 0usize;
        let mut scratch = vec![0u8; self.fs.cluster_size()];

        while done < to_read {
            let pos = offset + done as u64;
            let cluster_index = pos / cluster_size;
            let cluster_off = (pos % cluster_size) as usize;
            let Some(cluster) = self.cluster_at(state.first_cluster, cluster_index)? else { break };

            self.fs.read_cluster(cluster, &mut scratch)?;
            let n = (to_read - done).min(self.fs.cluster_size() - cluster_off);
            buf[done..done + n].copy_from_slice(&scratch[cluster_off..cluster_off + n]);
            done += n;
        }

        Ok(done)
    }

    fn write(&self, offset: u64, buf: &[u8]) -> KResult<usize> {
        if buf.len() > MAX_WRITE_SIZE {
            return Err(Error::InvalidArgument);
        }
        let _guard = self.fs.op_lock.lock();
        let mut state = self.state.lock();
        let cluster_size = self.fs.cluster_size() as u64;

        if state.first_cluster == 0 {
            state.first_cluster = self.fs.allocate_zeroed_cluster()?;
        }

        let needed_clusters = ((offset + buf.len() as u64).max(1)).div_ceil(cluster_size);
        let mut have_clusters = 1u64;
        let mut tail = state.first_cluster;
        while have_clusters < needed_clusters {
            let next = self.fs.fat.lock().get(tail)?;
            if fat32_fmt::is_eoc(next) {
                tail = self.fs.extend_chain(tail)?;
            } else {
                tail = next;
            }
            have_clusters += 1;
        }

        let mut done = 0usize;
        let mut scratch = vec![0u8; self.fs.cluster_size()];

        while done < buf.len() {
            let pos = offset + done as u64;
            let cluster_index = pos / cluster_size;
            let cluster_off = (pos % cluster_size) as usize;
            let cluster = self.cluster_at(state.first_cluster, cluster_index)?.ok_or(Error::Corruption { detail: "file cluster chain shorter than write range" })?;

            self.fs.read_cluster(cluster, &mut scratch)?;
            let n = (buf.len() - done).min(self.fs.cluster_size() - cluster_off);
            scratch[cluster_off..cluster_off + n].copy_from_slice(&buf[done..done + n]);
            self.fs.write_cluster(cluster, &scratch)?;
            done += n;
        }

        state.size = state.size.max(offset + done as u64);
        self.persist_metadata(&state)?;
        Ok(done)
    }

    fn truncate(&self, size: u64) -> KResult<()> {
        let _guard = self.fs.op_lock.lock();
        let mut state = self.state.lock();
        let cluster_size = self.fs.cluster_size() as u64;

        if size == 0 {
            if state.first_cluster != 0 {
                self.fs.free_chain(state.first_cluster)?;
            }
            state.first_cluster = 0;
        } else if size < state.size {
            let keep = size.div_ceil(cluster_size) as u32;
            self.fs.truncate_chain(state.first_cluster, keep)?;
        } else if size > state.size {
            let needed_clusters = size.div_ceil(cluster_size);
            if state.first_cluster == 0 {
                state.first_cluster = self.fs.allocate_zeroed_cluster()?;
            }
            let mut have_clusters = 1u64;
            let mut tail = state.first_cluster;
            while have_clusters < needed_clusters {
                let next = self.fs.fat.lock().get(tail)?;
                tail = if fat32_fmt::is_eoc(next) { self.fs.extend_chain(tail)? } else { next };
                have_clusters += 1;
            }
        }

        state.size = size;
        self.persist_metadata(&state)
    }

    fn getattr(&self) -> Attr {
        Attr { size: self.state.lock().size }
    }
}
