use tracing::{debug, info, warn};

/// Nice level of Android's URGENT_DISPLAY priority
pub const URGENT_DISPLAY_PRIORITY: i32 = -8;

/// Raise the calling thread's scheduling priority.
///
/// Needs CAP_SYS_NICE for negative values; without it the thread keeps its
/// default priority and a warning is logged.
pub fn raise_thread_priority(nice: i32) -> bool {
    // SAFETY: gettid has no preconditions.
    let tid = unsafe { libc::syscall(libc::SYS_gettid) } as libc::id_t;
    // SAFETY: setpriority only reads its integer arguments.
    let res = unsafe { libc::setpriority(libc::PRIO_PROCESS, tid, nice) };
    if res == 0 {
        debug!(tid, nice, "thread priority raised");
        true
    } else {
        warn!(
            tid,
            nice,
            error = %std::io::Error::last_os_error(),
            "unable to raise thread priority"
        );
        false
    }
}

/// Pin the calling thread to `core`, if that core exists.
pub fn pin_to_core(core: usize) -> bool {
    let Some(ids) = core_affinity::get_core_ids() else {
        warn!("unable to enumerate CPU cores");
        return false;
    };
    match ids.into_iter().find(|id| id.id == core) {
        Some(id) if core_affinity::set_for_current(id) => {
            info!(core, "thread pinned");
            true
        }
        Some(_) => {
            warn!(core, "failed to pin thread");
            false
        }
        None => {
            warn!(core, "no such CPU core, thread left unpinned");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn current_nice() -> i32 {
        // SAFETY: gettid has no preconditions; getpriority only reads its arguments.
        unsafe {
            let tid = libc::syscall(libc::SYS_gettid) as libc::id_t;
            libc::getpriority(libc::PRIO_PROCESS, tid)
        }
    }

    #[test]
    fn lowering_priority_never_needs_privileges() {
        let handle = std::thread::spawn(|| {
            let nice = (current_nice() + 1).min(19);
            (raise_thread_priority(nice), nice, current_nice())
        });
        let (applied, requested, now) = handle.join().unwrap();
        assert!(applied);
        assert_eq!(now, requested);
    }

    #[test]
    fn pinning_to_missing_core_is_refused() {
        assert!(!pin_to_core(usize::MAX));
    }
}
