// 本地数据持久化服务
//
// - Inventory: 服务器 / 命令 / 隧道配置的只读查询
// - ResultStore: 执行结果的写入与查询
// - MemoryStore: 进程内实现
// - JsonStore: 配置目录下的 JSON 文件实现

pub mod json;
pub mod memory;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::{AppSettings, CheckCommand, CheckStatus, ExecutionResult, Server, Tunnel};

pub use json::JsonStore;
pub use memory::MemoryStore;

/// 资产清单（外部协作方，执行期间只读）
#[async_trait]
pub trait Inventory: Send + Sync {
    async fn server(&self, id: i64) -> Result<Option<Server>>;
    async fn command(&self, id: i64) -> Result<Option<CheckCommand>>;
    async fn tunnel(&self, id: i64) -> Result<Option<Tunnel>>;
}

/// 执行结果存储（外部协作方）
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// 追加一条结果，写入后不再修改
    async fn save(&self, result: ExecutionResult) -> Result<()>;
    /// 按条件查询，最新的在前
    async fn results(&self, filter: &ResultFilter) -> Result<Vec<ExecutionResult>>;
}

/// 结果查询条件
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResultFilter {
    pub server_id: Option<i64>,
    pub command_id: Option<i64>,
    pub status: Option<CheckStatus>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl ResultFilter {
    pub fn matches(&self, result: &ExecutionResult) -> bool {
        self.server_id.map_or(true, |id| result.server_id == id)
            && self.command_id.map_or(true, |id| result.command_id == id)
            && self.status.map_or(true, |status| result.status == status)
    }

    /// 过滤、按完成时间倒序、分页
    ///
    /// `results` 按写入顺序给出；完成时间相同时后写入的在前
    pub fn apply<'a, I>(&self, results: I) -> Vec<ExecutionResult>
    where
        I: IntoIterator<Item = &'a ExecutionResult>,
        I::IntoIter: DoubleEndedIterator,
    {
        let mut matched: Vec<ExecutionResult> = results
            .into_iter()
            .rev()
            .filter(|r| self.matches(r))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.checked_at.cmp(&a.checked_at));

        let page = matched.into_iter().skip(self.offset);
        match self.limit {
            Some(limit) => page.take(limit).collect(),
            None => page.collect(),
        }
    }
}

/// 资产清单文件内容
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InventoryData {
    pub servers: Vec<Server>,
    pub commands: Vec<CheckCommand>,
    pub tunnels: Vec<Tunnel>,
}

impl InventoryData {
    /// 只包含默认检查命令的清单
    pub fn with_default_commands() -> Self {
        Self {
            commands: CheckCommand::defaults(),
            ..Default::default()
        }
    }

    /// 没有任何命令时补上默认检查命令
    pub fn seed_default_commands(&mut self) -> bool {
        if !self.commands.is_empty() {
            return false;
        }
        self.commands = CheckCommand::defaults();
        true
    }

    pub fn find_server(&self, id: i64) -> Option<&Server> {
        self.servers.iter().find(|s| s.id == id)
    }

    pub fn find_command(&self, id: i64) -> Option<&CheckCommand> {
        self.commands.iter().find(|c| c.id == id)
    }

    pub fn find_tunnel(&self, id: i64) -> Option<&Tunnel> {
        self.tunnels.iter().find(|t| t.id == id)
    }
}

/// 获取配置目录路径
/// macOS: ~/Library/Application Support/fleetcheck
/// Linux: ~/.config/fleetcheck
/// Windows: C:\Users\<用户名>\AppData\Roaming\fleetcheck
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .context("Unable to locate the system config directory")?
        .join("fleetcheck");
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).context("Unable to create config directory")?;
    }
    Ok(config_dir)
}

// ======================== Settings 配置持久化 ========================

/// 获取设置配置文件路径
pub fn get_settings_file(config_dir: &Path) -> PathBuf {
    config_dir.join("settings.json")
}

/// 加载应用设置，文件不存在时返回默认值
pub fn load_settings(config_dir: &Path) -> Result<AppSettings> {
    let path = get_settings_file(config_dir);
    if !path.exists() {
        return Ok(AppSettings::default());
    }
    let content = std::fs::read_to_string(&path).context("Unable to read settings file")?;
    let settings: AppSettings =
        serde_json::from_str(&content).context("Unable to parse settings file")?;
    Ok(settings)
}

/// 保存应用设置
pub fn save_settings(config_dir: &Path, settings: &AppSettings) -> Result<()> {
    let path = get_settings_file(config_dir);
    let content = serde_json::to_string_pretty(settings).context("Unable to serialize settings")?;
    std::fs::write(&path, content).context("Unable to write settings file")?;
    Ok(())
}
