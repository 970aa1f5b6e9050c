// Export the CPU backend implementation
mod cpu;
pub use cpu::CpuBackend;
