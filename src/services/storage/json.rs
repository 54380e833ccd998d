// JSON 文件存储
// 清单按 读取 → 修改 → 写回 的方式访问；执行结果每条一行追加写入
// results.jsonl 只增不删，查询时整文件读取

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{Inventory, InventoryData, ResultFilter, ResultStore};
use crate::models::{CheckCommand, ExecutionResult, Server, Tunnel};

/// 配置目录下的 JSON 文件存储
/// - inventory.json: 服务器、命令、隧道
/// - results.jsonl: 执行结果（JSON Lines）
pub struct JsonStore {
    dir: PathBuf,
    /// 串行化结果文件的追加写入
    write_lock: Mutex<()>,
}

impl JsonStore {
    /// 打开存储目录（不存在则创建）
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Unable to create data directory {}", dir.display()))?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 获取清单文件路径
    pub fn inventory_file(&self) -> PathBuf {
        self.dir.join("inventory.json")
    }

    /// 获取结果文件路径
    pub fn results_file(&self) -> PathBuf {
        self.dir.join("results.jsonl")
    }

    /// 写入默认清单（已存在则保留），返回是否新建
    pub async fn init(&self) -> Result<bool> {
        let path = self.inventory_file();
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let mut data = self.load_inventory().await?;
            if data.seed_default_commands() {
                self.save_inventory(&data).await?;
                info!("[Storage] Seeded default check commands");
            }
            return Ok(false);
        }
        self.save_inventory(&InventoryData::with_default_commands())
            .await?;
        info!("[Storage] Created {}", path.display());
        Ok(true)
    }

    /// 加载清单，文件不存在时只有默认检查命令
    pub async fn load_inventory(&self) -> Result<InventoryData> {
        let path = self.inventory_file();
        let mut data: InventoryData = match read_json(&path).await? {
            Some(data) => data,
            None => InventoryData::default(),
        };
        data.seed_default_commands();
        Ok(data)
    }

    /// 保存清单
    pub async fn save_inventory(&self, data: &InventoryData) -> Result<()> {
        write_json(&self.inventory_file(), data).await
    }

    /// 按写入顺序读取全部结果
    async fn load_results(&self) -> Result<Vec<ExecutionResult>> {
        let path = self.results_file();
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("Unable to read {}", path.display()));
            }
        };
        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(index, line)| {
                serde_json::from_str(line).with_context(|| {
                    format!("Unable to parse {} line {}", path.display(), index + 1)
                })
            })
            .collect()
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("Unable to read {}", path.display()));
        }
    };
    let value = serde_json::from_str(&content)
        .with_context(|| format!("Unable to parse {}", path.display()))?;
    Ok(Some(value))
}

async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value).context("Unable to serialize data")?;
    tokio::fs::write(path, content)
        .await
        .with_context(|| format!("Unable to write {}", path.display()))?;
    Ok(())
}

#[async_trait]
impl Inventory for JsonStore {
    async fn server(&self, id: i64) -> Result<Option<Server>> {
        Ok(self.load_inventory().await?.find_server(id).cloned())
    }

    async fn command(&self, id: i64) -> Result<Option<CheckCommand>> {
        Ok(self.load_inventory().await?.find_command(id).cloned())
    }

    async fn tunnel(&self, id: i64) -> Result<Option<Tunnel>> {
        Ok(self.load_inventory().await?.find_tunnel(id).cloned())
    }
}

#[async_trait]
impl ResultStore for JsonStore {
    async fn save(&self, result: ExecutionResult) -> Result<()> {
        let mut line = serde_json::to_string(&result).context("Unable to serialize result")?;
        line.push('\n');

        let path = self.results_file();
        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("Unable to open {}", path.display()))?;
        file.write_all(line.as_bytes())
            .await
            .with_context(|| format!("Unable to write {}", path.display()))?;
        file.flush().await?;
        debug!(
            "[Storage] Result for server {} command {} stored",
            result.server_id, result.command_id
        );
        Ok(())
    }

    async fn results(&self, filter: &ResultFilter) -> Result<Vec<ExecutionResult>> {
        let results = self.load_results().await?;
        Ok(filter.apply(results.iter()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CheckStatus, TunnelType};
    use chrono::Utc;

    #[tokio::test]
    async fn test_init_writes_default_inventory_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::open(dir.path().join("data")).await.unwrap();

        assert!(store.init().await.unwrap());
        assert!(store.inventory_file().exists());
        assert!(!store.init().await.unwrap());

        let data = store.load_inventory().await.unwrap();
        assert_eq!(data.commands.len(), 7);
        assert!(data.servers.is_empty());
    }

    #[tokio::test]
    async fn test_lookup_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::open(dir.path()).await.unwrap();

        let mut data = InventoryData::with_default_commands();
        data.servers.push(Server {
            id: 1,
            name: "web".to_string(),
            host: "10.0.0.1".to_string(),
            username: "ops".to_string(),
            ..Default::default()
        });
        data.tunnels.push(Tunnel {
            id: 9,
            server_id: 1,
            tunnel_type: TunnelType::Dynamic,
            local_port: 1080,
            remote_host: String::new(),
            remote_port: 0,
        });
        store.save_inventory(&data).await.unwrap();

        assert_eq!(store.server(1).await.unwrap().unwrap().host, "10.0.0.1");
        assert!(store.server(2).await.unwrap().is_none());
        assert_eq!(
            store.tunnel(9).await.unwrap().unwrap().tunnel_type,
            TunnelType::Dynamic
        );
    }

    #[tokio::test]
    async fn test_results_append_and_query() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::open(dir.path()).await.unwrap();
        assert!(store
            .results(&ResultFilter::default())
            .await
            .unwrap()
            .is_empty());

        for (command_id, status) in [(1, CheckStatus::Success), (2, CheckStatus::Failed)] {
            store
                .save(ExecutionResult {
                    server_id: 1,
                    command_id,
                    status,
                    output: None,
                    error_message: None,
                    execution_time_ms: 10,
                    checked_at: Utc::now(),
                })
                .await
                .unwrap();
        }

        let all = store.results(&ResultFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);
        let failed = store
            .results(&ResultFilter {
                status: Some(CheckStatus::Failed),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].command_id, 2);
    }

    #[tokio::test]
    async fn test_save_appends_without_rewriting() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::open(dir.path()).await.unwrap();
        let result = |command_id| ExecutionResult {
            server_id: 4,
            command_id,
            status: CheckStatus::Success,
            output: Some("ok".to_string()),
            error_message: None,
            execution_time_ms: 1,
            checked_at: Utc::now(),
        };

        store.save(result(1)).await.unwrap();
        let first = tokio::fs::read_to_string(store.results_file()).await.unwrap();
        assert_eq!(first.lines().count(), 1);

        store.save(result(2)).await.unwrap();
        let second = tokio::fs::read_to_string(store.results_file()).await.unwrap();
        assert!(second.starts_with(&first));
        assert_eq!(second.lines().count(), 2);

        // 最新的在前
        let ids: Vec<i64> = store
            .results(&ResultFilter::default())
            .await
            .unwrap()
            .iter()
            .map(|r| r.command_id)
            .collect();
        assert_eq!(ids, vec![2, 1]);

        tokio::fs::write(store.results_file(), format!("{}{{broken\n", second))
            .await
            .unwrap();
        let err = store.results(&ResultFilter::default()).await.unwrap_err();
        assert!(format!("{:#}", err).contains("line 3"));
    }

    #[tokio::test]
    async fn test_corrupt_inventory_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::open(dir.path()).await.unwrap();
        tokio::fs::write(store.inventory_file(), "{not json")
            .await
            .unwrap();
        assert!(store.server(1).await.is_err());
    }
}
