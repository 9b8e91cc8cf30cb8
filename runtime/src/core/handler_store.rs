use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;
use tokio::time::{sleep, Duration};
use tracing::warn;

use crate::shared::error::{AppResult, RuntimeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Python,
    Javascript,
}

impl Language {
    pub fn extension(self) -> &'static str {
        match self {
            Language::Python => "py",
            Language::Javascript => "js",
        }
    }

    pub fn interpreter(self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Javascript => "node",
        }
    }
}

/// Writes and removes handler source files on the volume bind-mounted
/// read-only into every warm container.
#[async_trait]
pub trait HandlerStore: Send + Sync {
    async fn write_handler(&self, function_id: i32, language: Language, code: &str) -> AppResult<()>;
    async fn remove_handler(&self, function_id: i32) -> AppResult<()>;
    fn container_path(&self, function_id: i32, language: Language) -> String;
}

/// Filesystem-backed store rooted at `shared_volume_root`.
pub struct FsHandlerStore {
    root: PathBuf,
}

impl FsHandlerStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn dir(&self, function_id: i32) -> PathBuf {
        self.root.join(function_id.to_string())
    }

    fn file(&self, function_id: i32, language: Language) -> PathBuf {
        self.dir(function_id)
            .join(format!("handler.{}", language.extension()))
    }

    /// A bounded retry in place of the one-second sleep the original
    /// implementation used to mask bind-mount propagation lag (spec §9): try
    /// an immediate metadata read, and only fall back to a short sleep if
    /// the file isn't visible yet.
    async fn settle(&self, path: &PathBuf) -> AppResult<()> {
        const ATTEMPTS: u32 = 5;
        const RETRY_DELAY: Duration = Duration::from_millis(100);

        for attempt in 0..ATTEMPTS {
            if fs::metadata(path).await.is_ok() {
                return Ok(());
            }
            if attempt + 1 < ATTEMPTS {
                sleep(RETRY_DELAY).await;
            }
        }

        warn!(path = %path.display(), "handler file still not visible after bounded retry, falling back to settle sleep");
        sleep(Duration::from_secs(1)).await;
        Ok(())
    }
}

#[async_trait]
impl HandlerStore for FsHandlerStore {
    async fn write_handler(&self, function_id: i32, language: Language, code: &str) -> AppResult<()> {
        let dir = self.dir(function_id);
        let path = self.file(function_id, language);

        fs::create_dir_all(&dir)
            .await
            .map_err(|e| RuntimeError::HandlerStore(format!("create_dir_all failed: {e}")))?;

        fs::write(&path, code)
            .await
            .map_err(|e| RuntimeError::HandlerStore(format!("write failed: {e}")))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o777);
            fs::set_permissions(&dir, perms.clone())
                .await
                .map_err(|e| RuntimeError::HandlerStore(format!("chmod dir failed: {e}")))?;
            fs::set_permissions(&path, perms)
                .await
                .map_err(|e| RuntimeError::HandlerStore(format!("chmod file failed: {e}")))?;
        }

        let file = fs::File::open(&path)
            .await
            .map_err(|e| RuntimeError::HandlerStore(format!("reopen for fsync failed: {e}")))?;
        file.sync_all()
            .await
            .map_err(|e| RuntimeError::HandlerStore(format!("fsync failed: {e}")))?;

        self.settle(&path).await
    }

    async fn remove_handler(&self, function_id: i32) -> AppResult<()> {
        let dir = self.dir(function_id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RuntimeError::HandlerStore(format!(
                "remove_dir_all failed: {e}"
            ))),
        }
    }

    fn container_path(&self, function_id: i32, language: Language) -> String {
        format!("/functions/{function_id}/handler.{}", language.extension())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_remove_round_trips() {
        let dir = std::env::temp_dir().join(format!("invok-handler-store-test-{}", std::process::id()));
        let store = FsHandlerStore::new(&dir);

        store
            .write_handler(1, Language::Python, "print('hi')")
            .await
            .unwrap();

        let path = store.file(1, Language::Python);
        let contents = fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents, "print('hi')");

        store.remove_handler(1).await.unwrap();
        assert!(fs::metadata(&path).await.is_err());

        let _ = fs::remove_dir_all(&dir).await;
    }

    #[test]
    fn container_path_matches_language_extension() {
        let store = FsHandlerStore::new("/functions");
        assert_eq!(store.container_path(9, Language::Python), "/functions/9/handler.py");
        assert_eq!(
            store.container_path(9, Language::Javascript),
            "/functions/9/handler.js"
        );
    }
}
