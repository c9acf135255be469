//! `mkfs.fat32`: lay down a fresh boot sector, FSInfo sector, FAT and root
//! directory on a raw disk.
//!
//! Geometry choices (1 reserved sector beyond the boot+FSInfo pair, a
//! single backup boot sector, cluster size picked from volume size) follow
//! the same conventions `fat32_fmt::Bootsector`'s field set assumes;
//! nothing here is mandated by the on-disk format itself.

use alloc::vec;

use fat32_fmt::{Bootsector, FsInfo, SECTOR_SIZE};

use crate::driver::ide::Disk;
use crate::prelude::*;

/// Pick a cluster size (in sectors), doubling at each power-of-two volume
/// size from 512 MiB up to the 128-sector ceiling used for anything past
/// 32 GiB.
fn choose_sectors_per_cluster(total_sectors: u32) -> u8 {
    const MIB_512: u32 = 512 * 1024 * 1024 / SECTOR_SIZE as u32;
    let mut threshold = MIB_512;
    let mut spc: u8 = 1;
    while total_sectors > threshold && spc < 128 {
        threshold = threshold.saturating_mul(2);
        spc *= 2;
    }
    spc
}

/// Derive `reserved_sectors`/`sectors_per_fat` together: the FAT size
/// depends on how many clusters the data region holds, which itself
/// depends on where the data region starts, which depends on the FAT
/// size. Iterate the two closed-form steps against each other until the
/// guess stops changing, capped well short of ever looping forever.
fn compute_geometry(total_sectors: u32, sectors_per_cluster: u8, num_fats: u8) -> (u16, u32) {
    const RESERVED_SECTORS: u16 = 32;
    const MAX_ITERATIONS: u32 = 10;

    let mut sectors_per_fat = 1u32;
    for _ in 0..MAX_ITERATIONS {
        let data_start = RESERVED_SECTORS as u32 + num_fats as u32 * sectors_per_fat;
        let approx_clusters = total_sectors.saturating_sub(data_start) / sectors_per_cluster as u32;
        let needed = ((approx_clusters + 2) * 4).div_ceil(SECTOR_SIZE as u32);
        if needed == sectors_per_fat {
            break;
        }
        sectors_per_fat = needed;
    }
    (RESERVED_SECTORS, sectors_per_fat)
}

pub struct FormatOptions {
    pub volume_label: [u8; 11],
    pub volume_serial: u32,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self { volume_label: *b"NO NAME    ", volume_serial: 0x1234_5678 }
    }
}

/// Format `disk` as a fresh FAT32 volume spanning its entire reported
/// capacity.
pub fn format(disk: &Disk, options: &FormatOptions) -> KResult<()> {
    let total_sectors = disk.total_sectors() as u32;
    let sectors_per_cluster = choose_sectors_per_cluster(total_sectors);

    const NUM_FATS: u8 = 2;
    let (reserved_sectors, sectors_per_fat) = compute_geometry(total_sectors, sectors_per_cluster, NUM_FATS);

    let data_start = reserved_sectors as u32 + NUM_FATS as u32 * sectors_per_fat;
    if total_sectors <= data_start {
        return Err(Error::InvalidArgument);
    }

    let bootsector = Bootsector {
        bytes_per_sector: SECTOR_SIZE as u16,
        sectors_per_cluster,
        reserved_sectors,
        num_fats: NUM_FATS,
        root_entries: 0,
        sectors_per_fat_16: 0,
        media: 0xF8,
        sectors_per_track: 63,
        heads: 255,
        hidden_sectors: 0,
        total_sectors_32: total_sectors,
        sectors_per_fat_32: sectors_per_fat,
        ext_flags: 0,
        fat_version: 0,
        root_cluster: fat32_fmt::FIRST_DATA_CLUSTER,
        fsinfo_sector: 1,
        backup_boot_sector: 6,
        drive_number: 0x80,
        volume_serial: options.volume_serial,
        volume_label: options.volume_label,
        fs_type: *b"FAT32   ",
    };

    let total_clusters = bootsector
        .total_clusters()
        .map_err(|_| Error::Corruption { detail: "chosen geometry yields too few clusters" })?;

    let mut boot_buf = [0u8; SECTOR_SIZE];
    bootsector.patch_into(&mut boot_buf);
    disk.write_sectors(0, &boot_buf)?;
    disk.write_sectors(bootsector.backup_boot_sector as u64, &boot_buf)?;

    let fsinfo = FsInfo { free_clusters: total_clusters - 1, next_free_cluster: fat32_fmt::FIRST_DATA_CLUSTER + 1 };
    let fsinfo_buf = fsinfo.to_bytes();
    disk.write_sectors(bootsector.fsinfo_sector as u64, &fsinfo_buf)?;

    let zero_sector = [0u8; SECTOR_SIZE];
    for copy in 0..NUM_FATS as u32 {
        let base = bootsector.fat_start_sector() + copy * sectors_per_fat;
        for sector in 0..sectors_per_fat {
            disk.write_sectors((base + sector) as u64, &zero_sector)?;
        }
    }

    // Cluster 0/1 entries are reserved and carry the media descriptor / a
    // dummy EOC marker; the root directory cluster is allocated as EOC.
    let mut fat0 = [0u8; SECTOR_SIZE];
    fat0[0..4].copy_from_slice(&(0x0FFF_FF00u32 | bootsector.media as u32).to_le_bytes());
    fat0[4..8].copy_from_slice(&0x0FFF_FFFFu32.to_le_bytes());
    fat0[8..12].copy_from_slice(&fat32_fmt::FAT_EOC_MIN.to_le_bytes());

    // Entries past `total_clusters + 2` never name a cluster in range;
    // `compute_geometry` sizes the FAT so that slack is confined to its
    // last sector. Mark it BAD rather than leaving it FREE. When the FAT
    // is a single sector, that's the same sector carrying clusters 0-2
    // above, so the slack is patched directly into `fat0` instead of a
    // separate buffer that would otherwise clobber them.
    const ENTRIES_PER_SECTOR: u32 = SECTOR_SIZE as u32 / 4;
    let last_valid_entry = total_clusters + fat32_fmt::FIRST_DATA_CLUSTER - 1;
    let last_sector_base = (sectors_per_fat - 1) * ENTRIES_PER_SECTOR;
    let slack_start = (last_valid_entry - last_sector_base + 1) as usize;

    if sectors_per_fat == 1 {
        for slot in slack_start..ENTRIES_PER_SECTOR as usize {
            fat0[slot * 4..slot * 4 + 4].copy_from_slice(&fat32_fmt::FAT_BAD.to_le_bytes());
        }
        for copy in 0..NUM_FATS as u32 {
            disk.write_sectors((bootsector.fat_start_sector() + copy * sectors_per_fat) as u64, &fat0)?;
        }
    } else {
        for copy in 0..NUM_FATS as u32 {
            disk.write_sectors((bootsector.fat_start_sector() + copy * sectors_per_fat) as u64, &fat0)?;
        }
        let mut last_sector = [0u8; SECTOR_SIZE];
        for slot in slack_start..ENTRIES_PER_SECTOR as usize {
            last_sector[slot * 4..slot * 4 + 4].copy_from_slice(&fat32_fmt::FAT_BAD.to_le_bytes());
        }
        for copy in 0..NUM_FATS as u32 {
            let sector = bootsector.fat_start_sector() + copy * sectors_per_fat + sectors_per_fat - 1;
            disk.write_sectors(sector as u64, &last_sector)?;
        }
    }

    let cluster_buf = vec![0u8; bootsector.cluster_size() as usize];
    disk.write_sectors(bootsector.data_start_sector() as u64, &cluster_buf)?;

    Ok(())
}
