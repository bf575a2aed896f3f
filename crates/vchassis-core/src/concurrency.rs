use crate::CoreError;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// Advisory lock serializing `create` and `delete` for one topology
/// name. Provisioning itself is not re-entrant and holds no lock; callers
/// take this one.
pub struct TopologyLock {
    lock_file: File,
}

/// Lock file for topology `name` under the system temp dir.
pub fn lock_path_for(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("vchassis-{name}.lock"))
}

fn open_lock_file(lock_path: &Path) -> Result<File, CoreError> {
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(lock_path)?)
}

impl TopologyLock {
    /// `None` when another process holds the lock.
    pub fn try_acquire(lock_path: &Path) -> Result<Option<Self>, CoreError> {
        let file = open_lock_file(lock_path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { lock_file: file })),
            Err(_) => Ok(None),
        }
    }
}

impl Drop for TopologyLock {
    fn drop(&mut self) {
        let _ = self.lock_file.unlock();
    }
}

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Exit status of a process killed by SIGINT.
const INTERRUPTED_EXIT: i32 = 130;

/// Record a shutdown request so a provisioning run stops between steps and
/// reports what it did. The lock is released when the run returns.
pub fn install_signal_handler() {
    let _ = ctrlc::set_handler(|| {
        if request_shutdown(&SHUTDOWN_REQUESTED) {
            eprintln!("\ninterrupted again, abandoning the run; resources may be left behind");
            std::process::exit(INTERRUPTED_EXIT);
        }
        eprintln!("\ninterrupt received, stopping at the next step boundary (again to abandon)");
    });
}

/// Mark a shutdown as requested; true when one already was.
fn request_shutdown(flag: &AtomicBool) -> bool {
    flag.swap(true, Ordering::SeqCst)
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}
