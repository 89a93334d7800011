use crate::error::{KeeperError, Result};
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const LOCK_FILE_NAME: &str = "layout-keeper.lock";

/// Эксклюзивная flock-блокировка: один демон на пользователя.
/// Снимается при drop или при завершении процесса.
pub struct InstanceLock {
    _lock: Flock<File>,
    path: PathBuf,
}

impl InstanceLock {
    /// Блокировка в $XDG_RUNTIME_DIR, без него - во временном каталоге
    pub fn acquire_default() -> Result<Self> {
        let dir = std::env::var_os("XDG_RUNTIME_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);
        Self::acquire(&dir)
    }

    pub fn acquire(dir: &Path) -> Result<Self> {
        let path = dir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;

        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => {
                let shown = path.to_string_lossy().into_owned();
                info!("Блокировка экземпляра получена: {}", shown);
                Ok(Self { _lock: lock, path })
            }
            Err((_, errno)) if errno == Errno::EWOULDBLOCK => Err(KeeperError::AlreadyRunning(
                path.to_string_lossy().into_owned(),
            )),
            Err((_, errno)) => Err(KeeperError::Io(errno.into())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        let shown = self.path.to_string_lossy().into_owned();
        debug!("Блокировка экземпляра снята: {}", shown);
    }
}
