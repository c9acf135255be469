//! Single-sector FAT cache and cluster-chain operations.
//!
//! The byte-level FAT entry encoding and bit-twiddling live in
//! [`fat32_fmt`] (host-testable against an in-memory table); this module
//! adds the disk I/O the kernel actually has, so every operation here can
//! fail and propagates `KResult` instead of the crate's infallible
//! `FatTable` trait.

use fat32_fmt::{
    fat_sector_and_offset, is_allocatable, is_bad, is_eoc, is_free, FAT_EOC_MIN, FAT_ENTRY_MASK,
    FAT_FREE, FIRST_DATA_CLUSTER, MAX_CHAIN_WALK, SECTOR_SIZE,
};

use crate::driver::ide;
use crate::prelude::*;

pub struct FatCache {
    fat_start_sector: u32,
    num_fats: u8,
    sectors_per_fat: u32,
    total_clusters: u32,
    cached_sector: Option<u32>,
    dirty: bool,
    data: [u8; SECTOR_SIZE],
}

impl FatCache {
    pub fn new(fat_start_sector: u32, num_fats: u8, sectors_per_fat: u32, total_clusters: u32) -> Self {
        Self {
            fat_start_sector,
            num_fats,
            sectors_per_fat,
            total_clusters,
            cached_sector: None,
            dirty: false,
            data: [0u8; SECTOR_SIZE],
        }
    }

    fn disk_read(&self, sector: u32, buf: &mut [u8; SECTOR_SIZE]) -> KResult<()> {
        let guard = ide::PRIMARY_MASTER.lock();
        let disk = guard.as_ref().ok_or(Error::Io { sector: sector as u64 })?;
        disk.read_sectors(sector as u64, buf)
    }

    fn disk_write(&self, sector: u32, buf: &[u8; SECTOR_SIZE]) -> KResult<()> {
        let guard = ide::PRIMARY_MASTER.lock();
        let disk = guard.as_ref().ok_or(Error::Io { sector: sector as u64 })?;
        disk.write_sectors(sector as u64, buf)
    }

    fn ensure_loaded(&mut self, sector: u32) -> KResult<()> {
        if self.cached_sector == Some(sector) {
            return Ok(());
        }
        self.flush()?;
        self.disk_read(self.fat_start_sector + sector, &mut self.data)?;
        self.cached_sector = Some(sector);
        Ok(())
    }

    pub fn flush(&mut self) -> KResult<()> {
        let Some(sector) = self.cached_sector else { return Ok(()) };
        if !self.dirty {
            return Ok(());
        }
        for copy in 0..self.num_fats as u32 {
            self.disk_write(self.fat_start_sector + copy * self.sectors_per_fat + sector, &self.data)?;
        }
        self.dirty = false;
        Ok(())
    }

    pub fn get(&mut self, cluster: u32) -> KResult<u32> {
        let (sector, offset) = fat_sector_and_offset(cluster);
        self.ensure_loaded(sector)?;
        let bytes = &self.data[offset..offset + 4];
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn set(&mut self, cluster: u32, value: u32) -> KResult<()> {
        let (sector, offset) = fat_sector_and_offset(cluster);
        self.ensure_loaded(sector)?;
        self.data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        self.dirty = true;
        Ok(())
    }

    fn link(&mut self, from: u32, to: u32) -> KResult<()> {
        let reserved = self.get(from)? & !FAT_ENTRY_MASK;
        self.set(from, reserved | (to & FAT_ENTRY_MASK))
    }

    pub fn count_chain(&mut self, first: u32) -> KResult<u32> {
        let mut cluster = first;
        let mut len = 0u32;
        loop {
            if len >= MAX_CHAIN_WALK {
                return Err(Error::Corruption { detail: "FAT chain exceeds walk cap" });
            }
            len += 1;
            let entry = self.get(cluster)? & FAT_ENTRY_MASK;
            if is_eoc(entry) {
                return Ok(len);
            }
            if is_free(entry) {
                return Err(Error::Corruption { detail: "FAT chain runs into a free cluster" });
            }
            if is_bad(entry) {
                return Err(Error::Corruption { detail: "FAT chain runs into a bad cluster" });
            }
            if !is_allocatable(entry, self.total_clusters) {
                return Err(Error::Corruption { detail: "FAT chain points out of range" });
            }
            cluster = entry;
        }
    }

    /// Scan for a free cluster starting at `hint`, mark it EOC and return
    /// its number.
    pub fn allocate_cluster(&mut self, hint: u32) -> KResult<u32> {
        let last_cluster = FIRST_DATA_CLUSTER + self.total_clusters - 1;
        let start = if hint < FIRST_DATA_CLUSTER || hint > last_cluster { FIRST_DATA_CLUSTER } else { hint };

        let mut cluster = start;
        for _ in 0..self.total_clusters {
            if is_free(self.get(cluster)?) {
                self.set(cluster, FAT_EOC_MIN)?;
                return Ok(cluster);
            }
            cluster = if cluster == last_cluster { FIRST_DATA_CLUSTER } else { cluster + 1 };
        }
        Err(Error::NoSpace)
    }

    /// Grow the chain ending at `tail` by one cluster, returning the new
    /// cluster number. The caller is responsible for zero-filling it.
    pub fn extend_chain(&mut self, tail: u32, hint: u32) -> KResult<u32> {
        let new_cluster = self.allocate_cluster(hint)?;
        self.link(tail, new_cluster)?;
        Ok(new_cluster)
    }

    pub fn free_chain(&mut self, first: u32) -> KResult<()> {
        let mut cluster = first;
        loop {
            let entry = self.get(cluster)? & FAT_ENTRY_MASK;
            self.set(cluster, FAT_FREE)?;
            if is_eoc(entry) || is_free(entry) || is_bad(entry) {
                return Ok(());
            }
            cluster = entry;
        }
    }

    /// Truncate the chain starting at `first` to at most `keep_clusters`
    /// clusters, freeing the remainder. Used for `Corruption` recovery
    /// (truncate to last valid cluster) as well as ordinary file shrinks.
    pub fn truncate_chain(&mut self, first: u32, keep_clusters: u32) -> KResult<()> {
        if keep_clusters == 0 {
            return self.free_chain(first);
        }
        let mut cluster = first;
        for _ in 1..keep_clusters {
            let entry = self.get(cluster)? & FAT_ENTRY_MASK;
            if is_eoc(entry) {
                return Ok(());
            }
            cluster = entry;
        }
        let next = self.get(cluster)? & FAT_ENTRY_MASK;
        self.set(cluster, FAT_EOC_MIN)?;
        if !is_eoc(next) && !is_free(next) {
            self.free_chain(next)?;
        }
        Ok(())
    }
}
