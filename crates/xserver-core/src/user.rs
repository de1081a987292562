use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use log::{info, warn};
use users::os::unix::UserExt;

/// Looks up passwd-database records and hands back [`UserHandle`]s, each
/// backed by a small persisted cache file for the two fields (`language`,
/// `session`) that the passwd database has no room for.
pub struct UserDirectory {
    run_directory: PathBuf,
}

impl UserDirectory {
    pub fn new(run_directory: PathBuf) -> Self {
        Self { run_directory }
    }

    /// `None` if no such user exists in the passwd database.
    pub fn by_name(&self, name: &str) -> Option<UserHandle> {
        let user = users::get_user_by_name(name)?;
        Some(self.handle_for(&user))
    }

    /// `None` if the effective uid has no passwd entry.
    pub fn current_user(&self) -> Option<UserHandle> {
        let uid = users::get_current_uid();
        let user = users::get_user_by_uid(uid)?;
        Some(self.handle_for(&user))
    }

    fn handle_for(&self, user: &users::User) -> UserHandle {
        let name = user.name().to_string_lossy().into_owned();
        let cache_path = self.run_directory.join("users").join(format!("{name}.cache"));
        let cache = load_cache(&cache_path);
        UserHandle {
            name,
            uid: user.uid(),
            gid: user.primary_group_id(),
            home: user.home_dir().to_path_buf(),
            shell: user.shell().to_path_buf(),
            cache_path,
            language: RefCell::new(cache.get("language").cloned()),
            session: RefCell::new(cache.get("session").cloned()),
        }
    }
}

/// A read-mostly projection of one passwd entry, plus two small persisted
/// preferences. Absence is modelled by `Option<UserHandle>` at the call
/// site, never by a null handle with defensive accessors.
pub struct UserHandle {
    name: String,
    uid: u32,
    gid: u32,
    home: PathBuf,
    shell: PathBuf,
    cache_path: PathBuf,
    language: RefCell<Option<String>>,
    session: RefCell<Option<String>>,
}

impl UserHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn gid(&self) -> u32 {
        self.gid
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn shell(&self) -> &Path {
        &self.shell
    }

    pub fn language(&self) -> Option<String> {
        self.language.borrow().clone()
    }

    pub fn session(&self) -> Option<String> {
        self.session.borrow().clone()
    }

    pub fn set_language(&self, language: &str) {
        *self.language.borrow_mut() = Some(language.to_string());
        self.persist();
    }

    pub fn set_session(&self, session: &str) {
        *self.session.borrow_mut() = Some(session.to_string());
        self.persist();
    }

    fn persist(&self) {
        let mut lines = Vec::new();
        if let Some(language) = self.language.borrow().as_ref() {
            lines.push(format!("language={language}"));
        }
        if let Some(session) = self.session.borrow().as_ref() {
            lines.push(format!("session={session}"));
        }

        if let Some(parent) = self.cache_path.parent() {
            if let Err(err) = std::fs::create_dir_all(parent) {
                warn!("could not create user cache directory '{}': {err}", parent.display());
                return;
            }
        }
        match std::fs::write(&self.cache_path, lines.join("\n")) {
            Ok(()) => info!("persisted preferences for '{}'", self.name),
            Err(err) => warn!("could not persist preferences for '{}': {err}", self.name),
        }
    }
}

fn load_cache(path: &Path) -> HashMap<String, String> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(_) => return HashMap::new(),
    };

    contents
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_run_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("xserver-core-user-test-{}-{name}", std::process::id()))
    }

    #[test]
    fn unknown_user_yields_none() {
        let directory = UserDirectory::new(temp_run_dir("unknown"));
        assert!(directory.by_name("no-such-user-should-exist-anywhere").is_none());
    }

    #[test]
    fn current_user_round_trips_through_the_passwd_database() {
        let directory = UserDirectory::new(temp_run_dir("current"));
        let handle = directory.current_user().expect("process has an effective uid");
        assert_eq!(handle.uid(), users::get_current_uid());
    }

    #[test]
    fn preferences_persist_across_directory_instances() {
        let run_dir = temp_run_dir("persist");
        let name = match UserDirectory::new(run_dir.clone()).current_user() {
            Some(handle) => handle.name().to_string(),
            None => return,
        };

        {
            let directory = UserDirectory::new(run_dir.clone());
            let handle = directory.by_name(&name).unwrap();
            handle.set_language("en_US.UTF-8");
            handle.set_session("gnome");
        }

        let directory = UserDirectory::new(run_dir.clone());
        let handle = directory.by_name(&name).unwrap();
        assert_eq!(handle.language().as_deref(), Some("en_US.UTF-8"));
        assert_eq!(handle.session().as_deref(), Some("gnome"));

        std::fs::remove_dir_all(&run_dir).ok();
    }
}
