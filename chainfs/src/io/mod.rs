mod block;
mod diskemu;

pub use block::{BlockStorage, SectorNumber};
pub use diskemu::{FileBlockEmulator, FileBlockEmulatorBuilder};
