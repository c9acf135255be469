pub mod ide;
pub mod serial;

use crate::prelude::*;

pub fn init() -> KResult<()> {
    serial::init()?;
    let _ = ide::init();
    Ok(())
}
