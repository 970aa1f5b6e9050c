pub mod cpu;
pub mod backend;

// Re-export the Backend trait and device bookkeeping
pub use backend::{Backend, DeviceId, DeviceInfo, DeviceSet, DeviceSpec, MemoryAccountant, Reservation};
// Re-export the CpuBackend for tests and custom device sets
pub use cpu::CpuBackend;
