use thiserror::Error;

#[derive(Error, Debug)]
pub enum RingError {
    #[error("capacity must be non-zero")]
    CapacityZero,

    #[error("mapping length must be a multiple of the page size ({0} bytes)")]
    LengthNotPageAligned(usize),

    #[error("mapping length must be a power of two, got {0}")]
    LengthNotPowerOfTwo(usize),

    #[error("mapping length must be at least one page ({0} bytes)")]
    LengthTooSmall(usize),

    #[error("memory mapping failed: {0}")]
    MmapFailed(#[from] nix::errno::Errno),
}
