pub mod disk;
pub mod memory;

pub use disk::FileRateStore;
pub use memory::MemoryRateStore;
