//! Compiled-in kernel configuration.
//!
//! There is no persistent config store before the VFS itself is mounted,
//! so this is built once at boot from constants and never touched again.

#[derive(Debug, Clone, Copy)]
pub struct KernelConfig {
    pub tick_hz: u32,
    pub default_quantum_ticks: u32,
    pub max_disks: usize,
}

impl KernelConfig {
    pub const fn default() -> Self {
        Self {
            tick_hz: 100,
            default_quantum_ticks: 5,
            max_disks: 4,
        }
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::default()
    }
}

pub static CONFIG: KernelConfig = KernelConfig::default();
