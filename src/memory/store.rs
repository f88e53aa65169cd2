//! Memory 实体：键值条目 + 可选的长期记忆链接
//!
//! 条目以类型擦除的方式保存任意 `Serialize` 值；编码时逐条尝试，
//! 单条失败只降级为 `EncodedValue::Unencodable`，不会拖垮整个 Memory 的快照。

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::state::EncodedValue;

/// 记忆分层：短期 / 中期（工作记忆）/ 长期
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    ShortTerm,
    Working,
    LongTerm,
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ShortTerm => "short_term",
            Self::Working => "working",
            Self::LongTerm => "long_term",
        })
    }
}

/// 创建 Memory 的纯数据配置
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub kind: MemoryKind,
}

impl MemoryConfig {
    pub fn new(kind: MemoryKind) -> Self {
        Self { id: None, kind }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// 可写入 Memory 的值
pub trait MemoryValue: Send + Sync + fmt::Debug {
    fn encode(&self) -> EncodedValue;
}

impl<T> MemoryValue for T
where
    T: Serialize + Send + Sync + fmt::Debug + 'static,
{
    fn encode(&self) -> EncodedValue {
        EncodedValue::capture(self)
    }
}

pub struct Memory {
    id: String,
    kind: MemoryKind,
    items: RwLock<BTreeMap<String, Arc<dyn MemoryValue>>>,
    long_term: RwLock<Option<Arc<Memory>>>,
}

impl Memory {
    pub fn new(id: impl Into<String>, kind: MemoryKind) -> Self {
        Self {
            id: id.into(),
            kind,
            items: RwLock::new(BTreeMap::new()),
            long_term: RwLock::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> MemoryKind {
        self.kind
    }

    pub async fn insert<T>(&self, key: impl Into<String>, value: T)
    where
        T: Serialize + Send + Sync + fmt::Debug + 'static,
    {
        self.items.write().await.insert(key.into(), Arc::new(value));
    }

    /// 读取条目的 JSON 形式；无法编码的条目返回 None
    pub async fn get(&self, key: &str) -> Option<Value> {
        match self.items.read().await.get(key)?.encode() {
            EncodedValue::Plain(v) => Some(v),
            EncodedValue::Unencodable { .. } => None,
        }
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.items.read().await.contains_key(key)
    }

    pub async fn remove(&self, key: &str) -> bool {
        self.items.write().await.remove(key).is_some()
    }

    pub async fn keys(&self) -> Vec<String> {
        self.items.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }

    /// 逐条编码的快照（按键排序）
    pub async fn encoded_items(&self) -> Vec<(String, EncodedValue)> {
        self.items
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.encode()))
            .collect()
    }

    pub async fn long_term(&self) -> Option<Arc<Memory>> {
        self.long_term.read().await.clone()
    }

    pub async fn set_long_term(&self, memory: Option<Arc<Memory>>) {
        *self.long_term.write().await = memory;
    }
}

impl fmt::Debug for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memory")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}
