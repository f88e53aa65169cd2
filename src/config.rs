//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__STORAGE__BASE_DIR=/var/lib/hive`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub agents: AgentsSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [storage] 段：检查点存储根目录与落盘策略
#[derive(Debug, Clone, Deserialize)]
pub struct StorageSection {
    /// 存储根，`data/` 与 `transactions/` 都在其下
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
    /// 写入后是否 fsync（测试环境可关闭以加速）
    #[serde(default = "default_fsync")]
    pub fsync: bool,
}

fn default_base_dir() -> PathBuf {
    PathBuf::from("./.hive")
}

fn default_fsync() -> bool {
    true
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            fsync: default_fsync(),
        }
    }
}

/// [agents] 段
#[derive(Debug, Clone, Deserialize)]
pub struct AgentsSection {
    /// 每个 Agent 保留的对话轮数
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
}

fn default_history_turns() -> usize {
    20
}

impl Default for AgentsSection {
    fn default() -> Self {
        Self {
            history_turns: default_history_turns(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.storage.base_dir, PathBuf::from("./.hive"));
        assert!(cfg.storage.fsync);
        assert_eq!(cfg.agents.history_turns, 20);
        assert!(cfg.app.name.is_none());
    }

    #[test]
    fn test_explicit_file_overrides() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[app]\nname = \"planner\"\n[storage]\nbase_dir = \"/tmp/hive-test\"\nfsync = false\n[agents]\nhistory_turns = 5"
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.app.name.as_deref(), Some("planner"));
        assert_eq!(cfg.storage.base_dir, PathBuf::from("/tmp/hive-test"));
        assert!(!cfg.storage.fsync);
        assert_eq!(cfg.agents.history_turns, 5);
    }
}
