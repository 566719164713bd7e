use std::io;

/// SCHED_FIFO priority requested for audio workers.
pub const RT_PRIORITY: i32 = 70;

/// Enables flush-to-zero and denormals-are-zero on the calling thread.
#[inline]
#[allow(deprecated)]
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub fn enable_ftz_daz() {
    #[cfg(target_arch = "x86")]
    use std::arch::x86::{_mm_getcsr, _mm_setcsr};
    #[cfg(target_arch = "x86_64")]
    use std::arch::x86_64::{_mm_getcsr, _mm_setcsr};

    const FTZ: u32 = 1 << 15;
    const DAZ: u32 = 1 << 6;
    unsafe {
        _mm_setcsr(_mm_getcsr() | FTZ | DAZ);
    }
}

#[inline]
#[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
pub fn enable_ftz_daz() {}

/// Requests SCHED_FIFO for the calling thread.
///
/// Returns the OS error when the request is denied; callers decide whether
/// that deserves a warning. Workers keep running at normal priority either way.
#[cfg(target_os = "linux")]
pub fn promote_current_thread() -> io::Result<()> {
    let param = libc::sched_param {
        sched_priority: RT_PRIORITY,
    };
    let rc = unsafe { libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::from_raw_os_error(rc))
    }
}

#[cfg(not(target_os = "linux"))]
pub fn promote_current_thread() -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "realtime scheduling is not available on this platform",
    ))
}

/// Locks the process address space into RAM. Missing privileges are not an
/// error: the engine still runs, just with page faults possible.
#[cfg(target_os = "linux")]
pub fn lock_memory() -> io::Result<()> {
    let rc = unsafe { libc::mlockall(libc::MCL_CURRENT | libc::MCL_FUTURE) };
    if rc != 0 {
        let err = io::Error::last_os_error();
        if matches!(err.raw_os_error(), Some(libc::EPERM) | Some(libc::ENOMEM)) {
            return Ok(());
        }
        return Err(err);
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn lock_memory() -> io::Result<()> {
    Ok(())
}

/// Pins the calling thread to a logical core, wrapping around when `core`
/// exceeds the number of cores reported.
#[cfg(feature = "pinning")]
pub fn pin_current_thread(core: usize) -> io::Result<()> {
    let cores = core_affinity::get_core_ids()
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "failed to query CPU topology"))?;
    if cores.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            "no CPU cores reported",
        ));
    }
    let target = cores[core % cores.len()];
    if core_affinity::set_for_current(target) {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::Other,
            "failed to apply CPU affinity",
        ))
    }
}

#[cfg(not(feature = "pinning"))]
pub fn pin_current_thread(_core: usize) -> io::Result<()> {
    Ok(())
}
