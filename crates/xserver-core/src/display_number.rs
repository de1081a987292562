use std::cell::RefCell;
use std::collections::HashSet;
use std::path::PathBuf;

use log::{debug, warn};

fn lock_path(display_number: u32) -> PathBuf {
    PathBuf::from(format!("/tmp/.X{display_number}-lock"))
}

/// Hands out unused X display numbers, reconciling its own in-memory
/// reservations against `/tmp/.X<n>-lock` files that belong to X servers this
/// process didn't spawn.
pub struct DisplayNumberAllocator {
    minimum: u32,
    reserved: RefCell<HashSet<u32>>,
}

impl DisplayNumberAllocator {
    pub fn new(minimum: u32) -> Self {
        Self {
            minimum,
            reserved: RefCell::new(HashSet::new()),
        }
    }

    /// Smallest `n >= minimum` not in our reserved set and not covered by a
    /// valid foreign lock file. The number is immediately recorded as
    /// reserved before returning.
    pub fn reserve(&self) -> u32 {
        let mut reserved = self.reserved.borrow_mut();
        let mut candidate = self.minimum;
        while reserved.contains(&candidate) || Self::is_foreign_lock_valid(candidate) {
            candidate += 1;
        }
        reserved.insert(candidate);
        debug!("reserved display number {candidate}");
        candidate
    }

    pub fn release(&self, display_number: u32) {
        if self.reserved.borrow_mut().remove(&display_number) {
            debug!("released display number {display_number}");
        }
    }

    /// A foreign lock is valid iff the file exists, its trimmed contents
    /// parse as a positive pid, and that pid appears alive. Any ambiguity
    /// (unreadable file, unparseable contents, a kill-probe error other than
    /// "no such process") is treated conservatively as "still valid".
    fn is_foreign_lock_valid(display_number: u32) -> bool {
        let contents = match std::fs::read_to_string(lock_path(display_number)) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return false,
            Err(err) => {
                warn!("could not read lock file for display {display_number}: {err}");
                return true;
            }
        };

        let pid: libc::pid_t = match contents.trim().parse() {
            Ok(pid) if pid > 0 => pid,
            _ => {
                warn!("lock file for display {display_number} has unparseable contents");
                return true;
            }
        };

        reactor::process_is_alive(pid)
    }
}
