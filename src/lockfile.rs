use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

#[derive(Debug, Serialize, Deserialize)]
struct LockRecord {
    pid: u32,
    token_fingerprint: String,
}

/// A held lock. Released (file removed) when dropped, covering every exit
/// path including panics that unwind through the guard.
pub struct LockHandle {
    path: PathBuf,
    pid: u32,
    released: bool,
}

impl LockHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if !self.released {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Single-instance-per-bot-token guard.
///
/// The lock path is keyed by a SHA-256 fingerprint of the bot token so that
/// distinct bot processes (e.g. a staging and production bot) never contend,
/// while two processes configured with the same token do.
pub struct Lockfile;

impl Lockfile {
    /// Acquire the lock for `bot_token`. Fails with `Error::AlreadyRunning` if
    /// a live process holds a matching lock; steals (overwrites) stale locks
    /// left behind by a dead PID.
    pub fn acquire(bot_token: &str) -> Result<LockHandle> {
        let path = lock_path(bot_token)?;
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        let fingerprint = fingerprint(bot_token);

        if let Ok(existing) = std::fs::read_to_string(&path) {
            if let Ok(record) = serde_json::from_str::<LockRecord>(&existing) {
                if record.token_fingerprint == fingerprint && pid_is_alive(record.pid) {
                    return Err(Error::AlreadyRunning(record.pid));
                }
            }
        }

        let pid = std::process::id();
        let record = LockRecord {
            pid,
            token_fingerprint: fingerprint,
        };
        std::fs::write(&path, serde_json::to_string(&record)?)?;

        Ok(LockHandle {
            path,
            pid,
            released: false,
        })
    }
}

fn fingerprint(bot_token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bot_token.as_bytes());
    let digest = hasher.finalize();
    digest.iter().take(5).map(|b| format!("{b:02x}")).collect()
}

fn lock_path(bot_token: &str) -> Result<PathBuf> {
    let base = dirs::data_local_dir()
        .ok_or_else(|| Error::Config("could not determine local data directory".into()))?;
    Ok(base
        .join("takopi")
        .join(format!("takopi-{}.lock", fingerprint(bot_token))))
}

#[cfg(unix)]
fn pid_is_alive(pid: u32) -> bool {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(not(unix))]
fn pid_is_alive(pid: u32) -> bool {
    // Best-effort: assume alive unless it's the current PID's parent in an
    // obviously-stale range. Real Windows support would shell out to
    // `tasklist`; the steal-on-stale-lock path is exercised on Unix in tests.
    pid != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_and_short() {
        let a = fingerprint("abc123");
        let b = fingerprint("abc123");
        assert_eq!(a, b);
        assert_eq!(a.len(), 10);
    }

    #[test]
    fn fingerprint_differs_per_token() {
        assert_ne!(fingerprint("token-a"), fingerprint("token-b"));
    }

    #[cfg(unix)]
    #[test]
    fn current_pid_reports_alive() {
        assert!(pid_is_alive(std::process::id()));
    }
}
