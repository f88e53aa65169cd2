//! 文件存储：`<base>/data/<key>` 为持久区，`<base>/transactions/<tx_id>/<key>` 为事务暂存区
//!
//! 单键写入走「同目录临时文件 → fsync → rename」，读者永远看不到写了一半的值。
//! 事务提交逐个 rename 暂存文件，跨键只保证尽力而为；提交失败时暂存区原样保留。

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::core::{StorageError, TransactionError};
use crate::state::storage::{validate_key, StorageProvider, Transaction, TransactionState};

const DATA_DIR: &str = "data";
const TRANSACTIONS_DIR: &str = "transactions";

/// 基于本地目录的存储
#[derive(Clone, Debug)]
pub struct FileStorage {
    base: PathBuf,
    fsync: bool,
}

impl FileStorage {
    pub fn new(base: impl AsRef<Path>) -> Self {
        Self {
            base: base.as_ref().to_path_buf(),
            fsync: true,
        }
    }

    /// 关闭 fsync（测试或可接受掉电丢失的场景）
    pub fn with_fsync(mut self, fsync: bool) -> Self {
        self.fsync = fsync;
        self
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn data_dir(&self) -> PathBuf {
        self.base.join(DATA_DIR)
    }

    pub fn transactions_dir(&self) -> PathBuf {
        self.base.join(TRANSACTIONS_DIR)
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        Ok(self.data_dir().join(validate_key(key)?))
    }

    /// 残留的暂存区（提交失败或进程崩溃留下），供运维排查
    pub async fn staged_transactions(&self) -> Result<Vec<String>, StorageError> {
        let dir = self.transactions_dir();
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(TRANSACTIONS_DIR, e)),
        };
        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::io(TRANSACTIONS_DIR, e))?
        {
            if let Some(name) = entry.file_name().to_str() {
                ids.push(name.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[async_trait]
impl StorageProvider for FileStorage {
    async fn store(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        atomic_write_file(&path, bytes, self.fsync)
            .await
            .map_err(|e| StorageError::io(key, e))?;
        tracing::debug!(key = %key, bytes = bytes.len(), "storage store");
        Ok(())
    }

    async fn retrieve(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::io(key, e)),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                prune_empty_dirs(&path, &self.data_dir()).await;
                tracing::debug!(key = %key, "storage delete");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::io(key, e)),
        }
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let root = self.data_dir();
        let prefix = prefix.to_string();
        let listed = tokio::task::spawn_blocking(move || collect_keys(&root, &prefix))
            .await
            .map_err(|e| StorageError::io(DATA_DIR, std::io::Error::new(ErrorKind::Other, e)))?;
        listed.map_err(|e| StorageError::io(DATA_DIR, e))
    }

    async fn create_transaction(&self) -> Result<Box<dyn Transaction>, StorageError> {
        let id = uuid::Uuid::new_v4().to_string();
        let staging = self.transactions_dir().join(&id);
        fs::create_dir_all(&staging)
            .await
            .map_err(|e| StorageError::io(format!("{TRANSACTIONS_DIR}/{id}"), e))?;
        tracing::debug!(tx_id = %id, "transaction opened");
        Ok(Box::new(FileTransaction {
            id,
            staging,
            data_dir: self.data_dir(),
            keys: Vec::new(),
            state: TransactionState::Open,
            fsync: self.fsync,
        }))
    }
}

/// 文件事务：写入暂存目录，commit 时按暂存顺序逐个 rename 到持久区
#[derive(Debug)]
pub struct FileTransaction {
    id: String,
    staging: PathBuf,
    data_dir: PathBuf,
    /// 暂存顺序即提交顺序（清单最后暂存，也最后可见）
    keys: Vec<String>,
    state: TransactionState,
    fsync: bool,
}

impl FileTransaction {
    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging
    }

    fn ensure_open(&self) -> Result<(), TransactionError> {
        if self.state.is_open() {
            Ok(())
        } else {
            Err(TransactionError::Closed(self.id.clone()))
        }
    }

    async fn move_staged(&self) -> std::io::Result<()> {
        for key in &self.keys {
            let src = self.staging.join(key);
            let dst = self.data_dir.join(key);
            if let Some(parent) = dst.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::rename(&src, &dst).await?;
            if self.fsync {
                sync_parent_dir(&dst).await;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Transaction for FileTransaction {
    fn id(&self) -> &str {
        &self.id
    }

    async fn store(&mut self, key: &str, bytes: &[u8]) -> Result<(), TransactionError> {
        self.ensure_open()?;
        let key = validate_key(key)?.to_string();
        let path = self.staging.join(&key);
        write_file(&path, bytes, self.fsync)
            .await
            .map_err(|e| StorageError::io(key.clone(), e))?;
        if !self.keys.contains(&key) {
            self.keys.push(key);
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), TransactionError> {
        self.ensure_open()?;
        if let Err(source) = self.move_staged().await {
            self.state = TransactionState::Failed;
            tracing::error!(
                tx_id = %self.id,
                staging = %self.staging.display(),
                "transaction commit failed, staging kept for recovery: {}",
                source
            );
            return Err(TransactionError::CommitFailed {
                tx_id: self.id.clone(),
                staging: self.staging.clone(),
                source,
            });
        }
        self.state = TransactionState::Committed;
        if let Err(e) = fs::remove_dir_all(&self.staging).await {
            tracing::warn!(tx_id = %self.id, "failed to remove staging after commit: {}", e);
        }
        tracing::debug!(tx_id = %self.id, keys = self.keys.len(), "transaction committed");
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), TransactionError> {
        self.ensure_open()?;
        self.state = TransactionState::RolledBack;
        match fs::remove_dir_all(&self.staging).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(source) => {
                return Err(TransactionError::RollbackFailed {
                    tx_id: self.id.clone(),
                    source,
                })
            }
        }
        tracing::debug!(tx_id = %self.id, "transaction rolled back");
        Ok(())
    }
}

impl Drop for FileTransaction {
    fn drop(&mut self) {
        if self.state.is_open() {
            tracing::warn!(
                tx_id = %self.id,
                staging = %self.staging.display(),
                "transaction dropped without commit or rollback"
            );
        }
    }
}

/// 原子写：同目录临时文件 → fsync → rename
async fn atomic_write_file(path: &Path, data: &[u8], fsync: bool) -> std::io::Result<()> {
    let temp_name = format!(
        ".{}.{}.tmp",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("file"),
        uuid::Uuid::new_v4()
    );
    let temp_path = path.with_file_name(&temp_name);
    write_file(&temp_path, data, fsync).await?;
    if let Err(e) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e);
    }
    if fsync {
        sync_parent_dir(path).await;
    }
    Ok(())
}

async fn write_file(path: &Path, data: &[u8], fsync: bool) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut file = fs::File::create(path).await?;
    file.write_all(data).await?;
    if fsync {
        file.sync_all().await?;
    }
    Ok(())
}

/// rename 的持久性在部分平台上需要 fsync 父目录；尽力而为
async fn sync_parent_dir(path: &Path) {
    #[cfg(unix)]
    {
        if let Some(parent) = path.parent() {
            if let Ok(dir) = fs::File::open(parent).await {
                let _ = dir.sync_all().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
}

/// 删除文件后向上清理空目录，直到 root（不含）
async fn prune_empty_dirs(path: &Path, root: &Path) {
    let mut current = path.parent();
    while let Some(dir) = current {
        if dir == root || !dir.starts_with(root) {
            break;
        }
        // 非空目录会失败，正好作为停止条件
        if fs::remove_dir(dir).await.is_err() {
            break;
        }
        current = dir.parent();
    }
}

fn collect_keys(root: &Path, prefix: &str) -> std::io::Result<Vec<String>> {
    if !root.exists() {
        return Ok(Vec::new());
    }
    let mut keys = Vec::new();
    for entry in walkdir::WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if name.starts_with('.') && name.ends_with(".tmp") {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        let key = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        if key.starts_with(prefix) {
            keys.push(key);
        }
    }
    keys.sort();
    Ok(keys)
}
