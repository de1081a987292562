use std::cell::OnceCell;
use std::cmp::Ordering;
use std::process::Command;

use log::{debug, warn};

const VERSION_PREFIX: &str = "X.Org X Server ";

/// Detects the installed X server's version by running `<command> -version`
/// once and memoising the parsed `(major, minor)` pair.
///
/// Never a process-global: each [`crate::local_x_server::LocalXServer`] (or
/// whatever shares one across seats running the same binary) owns its own
/// instance.
#[derive(Debug, Default)]
pub struct VersionProbe {
    version: OnceCell<(u32, u32)>,
}

impl VersionProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the memoised version, probing `command` the first time this
    /// is called. A probe that fails to spawn, exits non-zero, or produces no
    /// matching line yields `(0, 0)` rather than propagating an error --
    /// version-gated flags degrade to "assume old server" in that case.
    pub fn version(&self, command: &str) -> (u32, u32) {
        *self.version.get_or_init(|| Self::probe(command))
    }

    /// `compare(major, minor)`: negative/zero/positive depending on whether
    /// the detected version is less than, equal to, or greater than the
    /// given one, lexicographically on `(major, minor)`.
    pub fn compare(&self, command: &str, major: u32, minor: u32) -> Ordering {
        self.version(command).cmp(&(major, minor))
    }

    fn probe(command: &str) -> (u32, u32) {
        let output = match Command::new(command).arg("-version").output() {
            Ok(output) => output,
            Err(err) => {
                warn!("could not run '{command} -version': {err}");
                return (0, 0);
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr);
        for line in stderr.lines() {
            if let Some(rest) = line.strip_prefix(VERSION_PREFIX) {
                return parse_version(rest);
            }
        }

        debug!("no '{VERSION_PREFIX}' line in '{command} -version' output; assuming unknown version");
        (0, 0)
    }
}

fn parse_version(rest: &str) -> (u32, u32) {
    let mut tokens = rest.split('.');
    let major = tokens.next().and_then(|t| t.parse().ok()).unwrap_or(0);
    let minor = tokens.next().and_then(|t| t.parse().ok()).unwrap_or(0);
    (major, minor)
}
