//! 序列化单元：StateBundle、EntityReference、EncodedValue
//!
//! `data` 是无类型的嵌套 JSON，因此引用与降级占位都带 `_type` 判别字段，
//! 解码端无需 schema 即可区分「这是一个引用」与「这是普通数据」。

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value};

/// 当前唯一的状态版本；迁移尚未实现
pub const STATE_VERSION: &str = "1.0";

const TYPE_FIELD: &str = "_type";
const REFERENCE_TAG: &str = "entity_reference";
const UNENCODABLE_TAG: &str = "unencodable";

/// 实体类型标签
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityType {
    Agent,
    Memory,
    Workflow,
    Task,
    /// 宿主应用自定义的实体类型（需注册对应的编码器与恢复器）
    Custom(String),
}

impl EntityType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Agent => "Agent",
            Self::Memory => "Memory",
            Self::Workflow => "Workflow",
            Self::Task => "Task",
            Self::Custom(name) => name,
        }
    }

    /// 类型名会成为存储键的一段路径
    pub fn is_key_safe(&self) -> bool {
        is_key_segment(self.as_str())
    }
}

/// 存储键中单段路径是否安全（非空、无分隔符、非 `.`/`..`）
pub(crate) fn is_key_segment(s: &str) -> bool {
    !s.is_empty() && s != "." && s != ".." && !s.contains(['/', '\\'])
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for EntityType {
    fn from(s: &str) -> Self {
        match s {
            "Agent" => Self::Agent,
            "Memory" => Self::Memory,
            "Workflow" => Self::Workflow,
            "Task" => Self::Task,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl FromStr for EntityType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

impl Serialize for EntityType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EntityType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(EntityType::from(s.as_str()))
    }
}

/// 指向另一个实体的弱引用占位：只命名关系，不代表所有权，恢复后再解析
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityReference {
    pub entity_type: EntityType,
    pub entity_id: String,
}

impl EntityReference {
    pub fn new(entity_type: EntityType, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type,
            entity_id: entity_id.into(),
        }
    }

    /// 带 `_type: "entity_reference"` 判别字段的 JSON 形式
    pub fn to_value(&self) -> Value {
        json!({
            TYPE_FIELD: REFERENCE_TAG,
            "entity_type": self.entity_type.as_str(),
            "entity_id": self.entity_id,
        })
    }

    /// 识别引用占位；普通数据返回 None
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        if obj.get(TYPE_FIELD)?.as_str()? != REFERENCE_TAG {
            return None;
        }
        let entity_type = obj.get("entity_type")?.as_str()?;
        let entity_id = obj.get("entity_id")?.as_str()?;
        Some(Self::new(EntityType::from(entity_type), entity_id))
    }

    /// 解析可选引用字段：缺失或 null 视为无引用
    pub fn from_optional(value: Option<&Value>) -> Option<Self> {
        value.filter(|v| !v.is_null()).and_then(Self::from_value)
    }
}

impl fmt::Display for EntityReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity_type, self.entity_id)
    }
}

/// 尽力编码的结果：要么是真实数据，要么是带原因的降级占位
#[derive(Clone, Debug, PartialEq)]
pub enum EncodedValue {
    Plain(Value),
    Unencodable { type_name: String, reason: String },
}

impl EncodedValue {
    /// 序列化任意值；失败时降级为 Unencodable 而不是中断整个实体的编码
    pub fn capture<T: Serialize + ?Sized>(value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(v) => Self::Plain(v),
            Err(e) => Self::Unencodable {
                type_name: std::any::type_name::<T>().to_string(),
                reason: e.to_string(),
            },
        }
    }

    pub fn is_plain(&self) -> bool {
        matches!(self, Self::Plain(_))
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Plain(v) => v.clone(),
            Self::Unencodable { type_name, reason } => json!({
                TYPE_FIELD: UNENCODABLE_TAG,
                "type_name": type_name,
                "reason": reason,
            }),
        }
    }

    pub fn from_value(value: Value) -> Self {
        let placeholder = value
            .as_object()
            .filter(|obj| obj.get(TYPE_FIELD).and_then(Value::as_str) == Some(UNENCODABLE_TAG))
            .map(|obj| {
                let field = |k: &str| {
                    obj.get(k)
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string()
                };
                (field("type_name"), field("reason"))
            });
        match placeholder {
            Some((type_name, reason)) => Self::Unencodable { type_name, reason },
            None => Self::Plain(value),
        }
    }
}

/// 单个实体在某一时刻的序列化信封
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateBundle {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub state_version: String,
    pub data: Value,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl StateBundle {
    pub fn new(entity_type: EntityType, entity_id: impl Into<String>, data: Value) -> Self {
        Self {
            entity_type,
            entity_id: entity_id.into(),
            state_version: STATE_VERSION.to_string(),
            data,
            metadata: Map::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn reference(&self) -> EntityReference {
        EntityReference::new(self.entity_type.clone(), self.entity_id.clone())
    }

    pub fn serialize(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// data 中的字段；data 不是对象时视为空
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.data.as_object().and_then(|obj| obj.get(name))
    }
}
