//! A minimal static character-device filesystem mounted at `/dev`.
//!
//! The only non-FAT32 filesystem type the kernel ships: a fixed directory
//! (`ttyS0`, `null`) with no create/mkdir/unlink support, deliberately kept
//! this small per the ambient-stack expansion in the design notes. Also
//! home to [`BindVnodeOps`], the forwarding wrapper `mount::bind_mount`
//! uses to implement bind mounts without copying data (§4.4's "allocate a
//! new vnode whose ops are wrappers that forward every operation to the
//! underlying source vnode").

use alloc::boxed::Box;
use alloc::string::ToString;
use alloc::sync::Arc;

use super::mount::MountCreator;
use super::superblock::Superblock;
use super::vnode::{new_vnode, Attr, DirEntryInfo, Vnode, VnodeOps, VnodeType};
use crate::driver::serial::COM1;
use crate::prelude::*;

struct DevRoot;

const ENTRIES: [&str; 2] = ["ttyS0", "null"];

impl VnodeOps for DevRoot {
    fn vnode_type(&self) -> VnodeType {
        VnodeType::Dir
    }

    fn lookup(&self, name: &str) -> KResult<Vnode> {
        match name {
            "ttyS0" => Ok(new_vnode("ttyS0", Box::new(SerialVnode))),
            "null" => Ok(new_vnode("null", Box::new(NullVnode))),
            _ => Err(Error::NotFound),
        }
    }

    fn readdir(&self, index: usize) -> KResult<Option<DirEntryInfo>> {
        Ok(ENTRIES.get(index).map(|&name| DirEntryInfo {
            name: name.to_string(),
            vtype: VnodeType::CharDev,
        }))
    }
}

struct SerialVnode;

impl VnodeOps for SerialVnode {
    fn vnode_type(&self) -> VnodeType {
        VnodeType::CharDev
    }

    fn read(&self, _offset: u64, buf: &mut [u8]) -> KResult<usize> {
        let mut n = 0;
        while n < buf.len() {
            match COM1.read_byte_nonblock() {
                Some(byte) => {
                    buf[n] = byte;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }

    fn write(&self, _offset: u64, buf: &[u8]) -> KResult<usize> {
        for &byte in buf {
            COM1.write_byte(byte);
        }
        Ok(buf.len())
    }
}

struct NullVnode;

impl VnodeOps for NullVnode {
    fn vnode_type(&self) -> VnodeType {
        VnodeType::CharDev
    }
    fn read(&self, _offset: u64, _buf: &mut [u8]) -> KResult<usize> {
        Ok(0)
    }
    fn write(&self, _offset: u64, buf: &[u8]) -> KResult<usize> {
        Ok(buf.len())
    }
}

pub struct BindVnodeOps {
    source: Vnode,
}

impl BindVnodeOps {
    pub fn new(source: Vnode) -> Self {
        Self { source }
    }
}

impl VnodeOps for BindVnodeOps {
    fn vnode_type(&self) -> VnodeType {
        self.source.vnode_type()
    }
    fn read(&self, offset: u64, buf: &mut [u8]) -> KResult<usize> {
        self.source.read(offset, buf)
    }
    fn write(&self, offset: u64, buf: &[u8]) -> KResult<usize> {
        self.source.write(offset, buf)
    }
    fn lookup(&self, name: &str) -> KResult<Vnode> {
        self.source.lookup(name)
    }
    fn create(&self, name: &str) -> KResult<Vnode> {
        self.source.create(name)
    }
    fn mkdir(&self, name: &str) -> KResult<Vnode> {
        self.source.mkdir(name)
    }
    fn readdir(&self, index: usize) -> KResult<Option<DirEntryInfo>> {
        self.source.readdir(index)
    }
    fn unlink(&self, name: &str) -> KResult<()> {
        self.source.unlink(name)
    }
    fn truncate(&self, size: u64) -> KResult<()> {
        self.source.truncate(size)
    }
    fn getattr(&self) -> Attr {
        self.source.getattr()
    }
}

struct DevFsCreator;

impl MountCreator for DevFsCreator {
    fn mount(&self, _device: Option<&str>) -> KResult<Arc<Superblock>> {
        let root = new_vnode("/", Box::new(DevRoot));
        Ok(Superblock::new("devfs", root))
    }
}

pub fn register() -> KResult<()> {
    super::mount::register_filesystem("devfs", Box::new(DevFsCreator))
}
