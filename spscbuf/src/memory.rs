use crate::error::RingError;
use core::ptr::NonNull;
use nix::sys::memfd::{memfd_create, MemFdCreateFlag};
use nix::sys::mman::{mmap, mmap_anonymous, munmap, MapFlags, ProtFlags};
use nix::unistd::ftruncate;
use std::num::NonZero;
use std::os::fd::OwnedFd;

/// One memfd mapped twice at adjacent virtual addresses. Reads and writes
/// through `[ptr, ptr + 2*len)` alias `[ptr, ptr + len)`, so a region that
/// wraps past `len` is still one contiguous pointer range.
pub(crate) struct Memory {
    ptr: NonNull<u8>,
    len: usize,
    _fd: OwnedFd,
}

impl Memory {
    pub(crate) fn new(len: usize) -> Result<Self, RingError> {
        let page_size = page_size();
        if len % page_size != 0 {
            return Err(RingError::LengthNotPageAligned(page_size));
        }
        if !len.is_power_of_two() {
            return Err(RingError::LengthNotPowerOfTwo(len));
        }
        if len < page_size {
            return Err(RingError::LengthTooSmall(page_size));
        }

        let fd = memfd_create(c"spscbuf", MemFdCreateFlag::MFD_CLOEXEC)?;
        ftruncate(&fd, len as i64)?;

        let reserve = unsafe {
            mmap_anonymous(
                None,
                NonZero::new(len * 2).unwrap(),
                ProtFlags::PROT_NONE,
                MapFlags::MAP_PRIVATE | MapFlags::MAP_ANONYMOUS,
            )?
        };

        unsafe {
            mmap(
                Some(NonZero::new(reserve.as_ptr() as usize).unwrap()),
                NonZero::new(len).unwrap(),
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED | MapFlags::MAP_FIXED,
                &fd,
                0,
            )?;
        }

        unsafe {
            mmap(
                Some(NonZero::new(reserve.as_ptr().add(len) as usize).unwrap()),
                NonZero::new(len).unwrap(),
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED | MapFlags::MAP_FIXED,
                &fd,
                0,
            )?;
        }

        let ptr = NonNull::new(reserve.as_ptr() as *mut u8).expect("mmap returned null pointer");

        Ok(Memory { ptr, len, _fd: fd })
    }

    pub(crate) fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }
}

impl Drop for Memory {
    fn drop(&mut self) {
        unsafe {
            let _ = munmap(
                NonNull::new(self.ptr.as_ptr() as *mut _).unwrap(),
                self.len * 2,
            );
        }
    }
}

unsafe impl Send for Memory {}
unsafe impl Sync for Memory {}

pub(crate) fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}
