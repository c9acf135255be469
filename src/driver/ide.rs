//! ATA PIO block driver (LBA28/LBA48), polling-based.
//!
//! The reference kernel's block layer is AHCI/DMA-based (`kernel/block.rs`,
//! `ahci/*`) and not directly portable to PIO, but its adapter-level shape
//! is: a `Spin`-guarded port struct, a `probe()` that reads an IDENTIFY-like
//! structure, and an `AdapterPortStats` counter block tallying completed
//! and failed transfers. That shape is kept here; the actual read/write
//! sequencing follows the standard ATA PIO protocol (select drive, set up
//! LBA registers, issue command, poll status, PIO the data in/out).

use alloc::string::String;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::prelude::*;
use khal::io::{inb, insw, io_wait, outb, outsw};

const PRIMARY_BASE: u16 = 0x1F0;
const PRIMARY_CONTROL: u16 = 0x3F6;
const SECONDARY_BASE: u16 = 0x170;
const SECONDARY_CONTROL: u16 = 0x376;

const REG_DATA: u16 = 0;
const REG_SECTOR_COUNT: u16 = 2;
const REG_LBA_LOW: u16 = 3;
const REG_LBA_MID: u16 = 4;
const REG_LBA_HIGH: u16 = 5;
const REG_DRIVE_HEAD: u16 = 6;
const REG_STATUS: u16 = 7;
const REG_COMMAND: u16 = 7;

const STATUS_ERR: u8 = 0x01;
const STATUS_DRQ: u8 = 0x08;
const STATUS_BSY: u8 = 0x80;

const CMD_READ_PIO: u8 = 0x20;
const CMD_WRITE_PIO: u8 = 0x30;
const CMD_READ_PIO_EXT: u8 = 0x24;
const CMD_WRITE_PIO_EXT: u8 = 0x34;
const CMD_IDENTIFY: u8 = 0xEC;
const CMD_CACHE_FLUSH: u8 = 0xE7;

const MAX_RETRIES: u32 = 3;
const POLL_SPINS: u32 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Addressing {
    Lba28,
    Lba48,
}

/// Classification of the LBA_MID/LBA_HIGH signature left behind after
/// selecting a drive, read before IDENTIFY is ever issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DriveSignature {
    Ata,
    SataLegacy,
    Atapi,
    None,
}

fn classify_signature(lba_mid: u8, lba_high: u8) -> DriveSignature {
    match (lba_mid, lba_high) {
        (0x00, 0x00) => DriveSignature::Ata,
        (0x3C, 0xC3) => DriveSignature::SataLegacy,
        (0x14, 0xEB) => DriveSignature::Atapi,
        _ => DriveSignature::None,
    }
}

#[derive(Default)]
pub struct DiskStats {
    pub reads_completed: AtomicU64,
    pub writes_completed: AtomicU64,
    pub errors: AtomicU64,
    pub retries: AtomicU64,
}

pub struct Disk {
    io_base: u16,
    control_base: u16,
    drive: u8,
    addressing: Addressing,
    total_sectors: u64,
    pub model: String,
    pub serial: String,
    pub firmware: String,
    io: Mutex<()>,
    pub stats: DiskStats,
}

fn wait_not_busy(io_base: u16) -> KResult<()> {
    for _ in 0..POLL_SPINS {
        if inb(io_base + REG_STATUS) & STATUS_BSY == 0 {
            return Ok(());
        }
        khal::io::io_wait();
    }
    Err(Error::Timeout)
}

fn wait_drq(io_base: u16) -> KResult<()> {
    for _ in 0..POLL_SPINS {
        let status = inb(io_base + REG_STATUS);
        if status & STATUS_ERR != 0 {
            return Err(Error::Io { sector: 0 });
        }
        if status & STATUS_DRQ != 0 {
            return Ok(());
        }
        khal::io::io_wait();
    }
    Err(Error::Timeout)
}

/// Decode an IDENTIFY string field: ATA packs each pair of characters
/// byte-swapped within its 16-bit word, so the high byte of each word comes
/// first on the wire. Trailing spaces and NULs are trimmed.
fn ata_string(words: &[u16]) -> String {
    let mut bytes = Vec::with_capacity(words.len() * 2);
    for &word in words {
        bytes.push((word >> 8) as u8);
        bytes.push((word & 0xFF) as u8);
    }
    let text = core::str::from_utf8(&bytes).unwrap_or("").trim_end_matches(['\0', ' ']);
    String::from(text)
}

impl Disk {
    /// Select `drive` (0 = master, 1 = slave) on the bus at `io_base`, wait
    /// the standard 400 ns settle delay (four status reads), then read back
    /// the LBA_MID/LBA_HIGH signature left by the device's own reset
    /// handshake, before any command has been issued.
    fn select_and_sign(io_base: u16, drive: u8) -> DriveSignature {
        outb(io_base + REG_DRIVE_HEAD, 0xA0 | (drive << 4));
        for _ in 0..4 {
            inb(io_base + REG_STATUS);
        }
        classify_signature(inb(io_base + REG_LBA_MID), inb(io_base + REG_LBA_HIGH))
    }

    /// Probe one (bus, drive) slot. Returns `Ok(None)` for an absent or
    /// ATAPI device (out of scope per the native-command-set non-goal),
    /// `Err` only on a genuine protocol failure mid-IDENTIFY.
    fn probe_slot(io_base: u16, control_base: u16, drive: u8) -> KResult<Option<Self>> {
        if inb(io_base + REG_STATUS) == 0xFF {
            return Ok(None); // floating bus: nothing wired to this channel
        }

        match Self::select_and_sign(io_base, drive) {
            DriveSignature::Atapi | DriveSignature::None => return Ok(None),
            DriveSignature::Ata | DriveSignature::SataLegacy => {}
        }

        outb(io_base + REG_SECTOR_COUNT, 0);
        outb(io_base + REG_LBA_LOW, 0);
        outb(io_base + REG_LBA_MID, 0);
        outb(io_base + REG_LBA_HIGH, 0);
        outb(io_base + REG_COMMAND, CMD_IDENTIFY);

        if inb(io_base + REG_STATUS) == 0 {
            return Ok(None);
        }
        wait_not_busy(io_base)?;
        if wait_drq(io_base).is_err() {
            return Ok(None);
        }

        let mut identify = [0u16; 256];
        unsafe { insw(io_base + REG_DATA, identify.as_mut_ptr(), 256) };

        let lba48_supported = identify[83] & 0x0400 != 0;
        let (addressing, total_sectors) = if lba48_supported {
            let sectors = (identify[100] as u64)
                | ((identify[101] as u64) << 16)
                | ((identify[102] as u64) << 32)
                | ((identify[103] as u64) << 48);
            (Addressing::Lba48, sectors)
        } else {
            let sectors = (identify[60] as u64) | ((identify[61] as u64) << 16);
            (Addressing::Lba28, sectors)
        };

        Ok(Some(Self {
            io_base,
            control_base,
            drive,
            addressing,
            total_sectors,
            model: ata_string(&identify[27..47]),
            serial: ata_string(&identify[10..20]),
            firmware: ata_string(&identify[23..27]),
            io: Mutex::new(()),
            stats: DiskStats::default(),
        }))
    }

    /// Scan the four conventional (bus, drive) slots: primary/secondary
    /// master/slave.
    pub fn probe_all() -> Vec<Self> {
        let slots = [
            (PRIMARY_BASE, PRIMARY_CONTROL, 0u8),
            (PRIMARY_BASE, PRIMARY_CONTROL, 1u8),
            (SECONDARY_BASE, SECONDARY_CONTROL, 0u8),
            (SECONDARY_BASE, SECONDARY_CONTROL, 1u8),
        ];
        slots
            .into_iter()
            .filter_map(|(io_base, control_base, drive)| Self::probe_slot(io_base, control_base, drive).ok().flatten())
            .collect()
    }

    pub fn total_sectors(&self) -> u64 {
        self.total_sectors
    }

    fn select_lba(&self, lba: u64, sector_count: u16) -> KResult<()> {
        match self.addressing {
            Addressing::Lba28 => {
                if lba >= 1 << 28 {
                    return Err(Error::InvalidArgument);
                }
                outb(self.io_base + REG_DRIVE_HEAD, 0xE0 | (self.drive << 4) | ((lba >> 24) as u8 & 0x0F));
                outb(self.io_base + REG_SECTOR_COUNT, sector_count as u8);
                outb(self.io_base + REG_LBA_LOW, lba as u8);
                outb(self.io_base + REG_LBA_MID, (lba >> 8) as u8);
                outb(self.io_base + REG_LBA_HIGH, (lba >> 16) as u8);
                Ok(())
            }
            Addressing::Lba48 => {
                outb(self.io_base + REG_DRIVE_HEAD, 0x40 | (self.drive << 4));
                outb(self.io_base + REG_SECTOR_COUNT, (sector_count >> 8) as u8);
                outb(self.io_base + REG_LBA_LOW, (lba >> 24) as u8);
                outb(self.io_base + REG_LBA_MID, (lba >> 32) as u8);
                outb(self.io_base + REG_LBA_HIGH, (lba >> 40) as u8);
                outb(self.io_base + REG_SECTOR_COUNT, sector_count as u8);
                outb(self.io_base + REG_LBA_LOW, lba as u8);
                outb(self.io_base + REG_LBA_MID, (lba >> 8) as u8);
                outb(self.io_base + REG_LBA_HIGH, (lba >> 16) as u8);
                Ok(())
            }
        }
    }

    fn read_command(&self) -> u8 {
        match self.addressing {
            Addressing::Lba28 => CMD_READ_PIO,
            Addressing::Lba48 => CMD_READ_PIO_EXT,
        }
    }

    fn write_command(&self) -> u8 {
        match self.addressing {
            Addressing::Lba28 => CMD_WRITE_PIO,
            Addressing::Lba48 => CMD_WRITE_PIO_EXT,
        }
    }

    fn check_bounds(&self, lba: u64, sector_count: u16) -> KResult<()> {
        if lba.saturating_add(sector_count as u64) > self.total_sectors {
            return Err(Error::InvalidArgument);
        }
        Ok(())
    }

    pub fn read_sectors(&self, lba: u64, buf: &mut [u8]) -> KResult<()> {
        if buf.len() % 512 != 0 {
            return Err(Error::InvalidArgument);
        }
        let sector_count = (buf.len() / 512) as u16;
        self.check_bounds(lba, sector_count)?;

        let _guard = self.io.lock();
        for attempt in 0..MAX_RETRIES {
            match self.read_sectors_once(lba, buf, sector_count) {
                Ok(()) => {
                    self.stats.reads_completed.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
                Err(e) if attempt + 1 < MAX_RETRIES => {
                    self.stats.retries.fetch_add(1, Ordering::Relaxed);
                    let _ = e;
                }
                Err(e) => {
                    self.stats.errors.fetch_add(1, Ordering::Relaxed);
                    return Err(e);
                }
            }
        }
        unreachable!()
    }

    fn read_sectors_once(&self, lba: u64, buf: &mut [u8], sector_count: u16) -> KResult<()> {
        wait_not_busy(self.io_base)?;
        self.select_lba(lba, sector_count)?;
        outb(self.io_base + REG_COMMAND, self.read_command());

        for chunk in buf.chunks_mut(512) {
            wait_not_busy(self.io_base)?;
            wait_drq(self.io_base).map_err(|_| Error::Io { sector: lba })?;
            let words = unsafe {
                core::slice::from_raw_parts_mut(chunk.as_mut_ptr() as *mut u16, 256)
            };
            unsafe { insw(self.io_base + REG_DATA, words.as_mut_ptr(), 256) };
        }
        Ok(())
    }

    pub fn write_sectors(&self, lba: u64, buf: &[u8]) -> KResult<()> {
        if buf.len() % 512 != 0 {
            return Err(Error::InvalidArgument);
        }
        let sector_count = (buf.len() / 512) as u16;
        self.check_bounds(lba, sector_count)?;

        let _guard = self.io.lock();
        for attempt in 0..MAX_RETRIES {
            match self.write_sectors_once(lba, buf, sector_count) {
                Ok(()) => {
                    self.stats.writes_completed.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
                Err(e) if attempt + 1 < MAX_RETRIES => {
                    self.stats.retries.fetch_add(1, Ordering::Relaxed);
                    let _ = e;
                }
                Err(e) => {
                    self.stats.errors.fetch_add(1, Ordering::Relaxed);
                    return Err(e);
                }
            }
        }
        unreachable!()
    }

    fn write_sectors_once(&self, lba: u64, buf: &[u8], sector_count: u16) -> KResult<()> {
        wait_not_busy(self.io_base)?;
        self.select_lba(lba, sector_count)?;
        outb(self.io_base + REG_COMMAND, self.write_command());

        for chunk in buf.chunks(512) {
            wait_not_busy(self.io_base)?;
            wait_drq(self.io_base).map_err(|_| Error::Io { sector: lba })?;
            let words =
                unsafe { core::slice::from_raw_parts(chunk.as_ptr() as *const u16, 256) };
            unsafe { outsw(self.io_base + REG_DATA, words.as_ptr(), 256) };
        }

        outb(self.io_base + REG_COMMAND, CMD_CACHE_FLUSH);
        wait_not_busy(self.io_base)
    }

    fn disable_interrupts(&self) {
        outb(self.control_base, 0x02);
        io_wait();
    }
}

lazy_static::lazy_static! {
    pub static ref PRIMARY_MASTER: Mutex<Option<Disk>> = Mutex::new(None);
    pub static ref DISKS: Mutex<Vec<Disk>> = Mutex::new(Vec::new());
}

/// Probe all four (bus, drive) slots and record every ATA/SATA-legacy disk
/// found. The first one discovered (in primary-master-first scan order) is
/// additionally exposed as [`PRIMARY_MASTER`], the disk the FAT32 layer
/// mounts against.
pub fn init() -> KResult<()> {
    let disks = Disk::probe_all();
    if disks.is_empty() {
        println_warn!("IDE: no disks found");
        return Err(Error::NotFound);
    }

    for disk in &disks {
        disk.disable_interrupts();
        println_info!(
            "IDE: {} sectors, model \"{}\", serial \"{}\", firmware \"{}\"",
            disk.total_sectors(),
            disk.model,
            disk.serial,
            disk.firmware
        );
    }

    let mut registry = DISKS.lock();
    *registry = disks;
    *PRIMARY_MASTER.lock() = registry.drain(..1).next();
    Ok(())
}
