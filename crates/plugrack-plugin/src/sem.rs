//! Process-shared POSIX semaphores embedded in the RT shared-memory region.

use std::cell::UnsafeCell;
use std::time::Duration;
#[cfg(not(target_os = "linux"))]
use std::time::Instant;

/// In-region semaphore storage. The creator calls [`init`](Self::init) once
/// before the worker attaches and [`destroy`](Self::destroy) after the
/// worker is gone.
#[repr(C)]
pub struct SemData {
    inner: UnsafeCell<libc::sem_t>,
}

unsafe impl Send for SemData {}
unsafe impl Sync for SemData {}

impl SemData {
    /// Initialize as process-shared with a zero count.
    pub fn init(&self) -> bool {
        unsafe { libc::sem_init(self.inner.get(), 1, 0) == 0 }
    }

    pub fn destroy(&self) {
        unsafe {
            libc::sem_destroy(self.inner.get());
        }
    }

    pub fn post(&self) {
        unsafe {
            libc::sem_post(self.inner.get());
        }
    }

    /// Block until posted. Only valid off the RT path, or on it when the
    /// outer host has declared offline mode.
    pub fn wait(&self) -> bool {
        loop {
            let rc = unsafe { libc::sem_wait(self.inner.get()) };
            if rc == 0 {
                return true;
            }
            if std::io::Error::last_os_error().raw_os_error() != Some(libc::EINTR) {
                return false;
            }
        }
    }

    /// Wait with a deadline. Returns false on timeout or error.
    #[cfg(target_os = "linux")]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut now = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        if unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut now) } != 0 {
            return false;
        }
        let nsec = now.tv_nsec as i64 + timeout.subsec_nanos() as i64;
        let abs = libc::timespec {
            tv_sec: now.tv_sec + timeout.as_secs() as libc::time_t + nsec / 1_000_000_000,
            tv_nsec: (nsec % 1_000_000_000) as libc::c_long,
        };
        loop {
            let rc = unsafe { libc::sem_timedwait(self.inner.get(), &abs) };
            if rc == 0 {
                return true;
            }
            match std::io::Error::last_os_error().raw_os_error() {
                Some(libc::EINTR) => continue,
                _ => return false,
            }
        }
    }

    /// Fallback for unix targets without `sem_timedwait` (macOS): spin on
    /// `sem_trywait` with short sleeps until the deadline.
    #[cfg(not(target_os = "linux"))]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if unsafe { libc::sem_trywait(self.inner.get()) } == 0 {
                return true;
            }
            match std::io::Error::last_os_error().raw_os_error() {
                Some(libc::EAGAIN) | Some(libc::EINTR) => {}
                _ => return false,
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_micros(100));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    fn boxed_sem() -> Arc<SemBox> {
        let b = Arc::new(SemBox(SemData {
            inner: UnsafeCell::new(unsafe { std::mem::zeroed() }),
        }));
        assert!(b.0.init());
        b
    }

    struct SemBox(SemData);

    impl Drop for SemBox {
        fn drop(&mut self) {
            self.0.destroy();
        }
    }

    #[test]
    fn timeout_expires_when_never_posted() {
        let sem = boxed_sem();
        let start = Instant::now();
        assert!(!sem.0.wait_timeout(Duration::from_millis(50)));
        assert!(start.elapsed() >= Duration::from_millis(45));
    }

    #[test]
    fn post_wakes_a_waiter() {
        let sem = boxed_sem();
        let waiter = Arc::clone(&sem);
        let handle = std::thread::spawn(move || waiter.0.wait_timeout(Duration::from_secs(2)));
        std::thread::sleep(Duration::from_millis(10));
        sem.0.post();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn post_before_wait_is_not_lost() {
        let sem = boxed_sem();
        sem.0.post();
        assert!(sem.0.wait_timeout(Duration::from_millis(10)));
    }
}
