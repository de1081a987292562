use std::cell::RefCell;
use std::path::PathBuf;

use log::warn;
use xauthority::{write_authority_file, AuthorityRecord};

/// Owns the on-disk lifecycle of one authority file: computed once per
/// server, replaced on every subsequent start, unlinked on every stop.
#[derive(Default)]
pub struct AuthorityFileManager {
    path: RefCell<Option<PathBuf>>,
}

impl AuthorityFileManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.path.borrow().clone()
    }

    /// Ensure `<run_directory>/root` exists (mode 0700, best-effort), compute
    /// the authority path from `record.address` if not already set, and
    /// write `record` in replace mode. Failures are logged and leave `path`
    /// unset so the command builder omits `-auth`; they never abort `start`.
    pub fn write(&self, run_directory: &std::path::Path, record: &AuthorityRecord) {
        let dir = run_directory.join("root");
        if let Err(err) = ensure_private_dir(&dir) {
            warn!("could not create authority directory '{}': {err}", dir.display());
        }

        let address = String::from_utf8_lossy(&record.address).into_owned();
        let path = self
            .path
            .borrow()
            .clone()
            .unwrap_or_else(|| dir.join(sanitize_address(&address)));

        match write_authority_file(&path, record) {
            Ok(()) => {
                *self.path.borrow_mut() = Some(path);
            }
            Err(err) => {
                warn!("could not write authority file '{}': {err}", path.display());
            }
        }
    }

    /// Unlink the authority file (if any) and clear the stored path.
    /// Idempotent: called on every stop path, including failed starts.
    pub fn remove(&self) {
        if let Some(path) = self.path.borrow_mut().take() {
            if let Err(err) = std::fs::remove_file(&path) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!("could not remove authority file '{}': {err}", path.display());
                }
            }
        }
    }
}

#[cfg(unix)]
fn ensure_private_dir(dir: &std::path::Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::create_dir_all(dir)?;
    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
}

#[cfg(not(unix))]
fn ensure_private_dir(dir: &std::path::Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)
}

/// The authority address is an arbitrary string (a `host/display` pair); it
/// may contain `/`, which would otherwise be read as a path separator.
fn sanitize_address(address: &str) -> String {
    address.replace('/', "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use xauthority::MitMagicCookieEncoder;
    use xauthority::AuthorityEncoder;

    fn temp_run_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("xserver-core-authority-test-{}-{name}", std::process::id()))
    }

    #[test]
    fn write_then_remove_round_trips() {
        let run_dir = temp_run_dir("roundtrip");
        let manager = AuthorityFileManager::new();
        let record = MitMagicCookieEncoder.generate("unix/host:0", 0);

        manager.write(&run_dir, &record);
        let path = manager.path().expect("write should have produced a path");
        assert!(path.exists());

        manager.remove();
        assert!(!path.exists());
        assert!(manager.path().is_none());

        std::fs::remove_dir_all(&run_dir).ok();
    }

    #[test]
    fn second_write_replaces_the_same_path() {
        let run_dir = temp_run_dir("replace");
        let manager = AuthorityFileManager::new();
        let encoder = MitMagicCookieEncoder;

        manager.write(&run_dir, &encoder.generate("unix/host:0", 0));
        let first_path = manager.path().unwrap();

        manager.write(&run_dir, &encoder.generate("unix/host:0", 0));
        let second_path = manager.path().unwrap();

        assert_eq!(first_path, second_path);
        std::fs::remove_dir_all(&run_dir).ok();
    }

    #[test]
    fn remove_without_a_prior_write_is_a_no_op() {
        AuthorityFileManager::new().remove();
    }
}
