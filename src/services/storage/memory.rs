// 进程内存储

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{Inventory, InventoryData, ResultFilter, ResultStore};
use crate::models::{CheckCommand, ExecutionResult, Server, Tunnel};

/// 进程内存储：清单和结果都保存在内存中，进程退出即丢失
#[derive(Default)]
pub struct MemoryStore {
    inventory: Mutex<InventoryData>,
    results: Mutex<Vec<ExecutionResult>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_inventory(inventory: InventoryData) -> Self {
        Self {
            inventory: Mutex::new(inventory),
            results: Mutex::new(Vec::new()),
        }
    }

    pub async fn add_server(&self, server: Server) {
        self.inventory.lock().await.servers.push(server);
    }

    pub async fn add_command(&self, command: CheckCommand) {
        self.inventory.lock().await.commands.push(command);
    }

    pub async fn add_tunnel(&self, tunnel: Tunnel) {
        self.inventory.lock().await.tunnels.push(tunnel);
    }

    /// 已保存的全部结果（按写入顺序）
    pub async fn saved(&self) -> Vec<ExecutionResult> {
        self.results.lock().await.clone()
    }
}

#[async_trait]
impl Inventory for MemoryStore {
    async fn server(&self, id: i64) -> Result<Option<Server>> {
        Ok(self.inventory.lock().await.find_server(id).cloned())
    }

    async fn command(&self, id: i64) -> Result<Option<CheckCommand>> {
        Ok(self.inventory.lock().await.find_command(id).cloned())
    }

    async fn tunnel(&self, id: i64) -> Result<Option<Tunnel>> {
        Ok(self.inventory.lock().await.find_tunnel(id).cloned())
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn save(&self, result: ExecutionResult) -> Result<()> {
        self.results.lock().await.push(result);
        Ok(())
    }

    async fn results(&self, filter: &ResultFilter) -> Result<Vec<ExecutionResult>> {
        let results = self.results.lock().await;
        Ok(filter.apply(results.iter()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CheckStatus;
    use chrono::Utc;

    #[tokio::test]
    async fn test_lookup_and_save() {
        let store = MemoryStore::with_inventory(InventoryData::with_default_commands());
        store
            .add_server(Server {
                id: 5,
                name: "db".to_string(),
                host: "10.0.0.5".to_string(),
                username: "ops".to_string(),
                ..Default::default()
            })
            .await;

        assert_eq!(store.server(5).await.unwrap().unwrap().name, "db");
        assert!(store.server(6).await.unwrap().is_none());
        assert_eq!(store.command(1).await.unwrap().unwrap().command, "df -h");
        assert!(store.tunnel(1).await.unwrap().is_none());

        store
            .save(ExecutionResult {
                server_id: 5,
                command_id: 1,
                status: CheckStatus::Success,
                output: Some("ok".to_string()),
                error_message: None,
                execution_time_ms: 3,
                checked_at: Utc::now(),
            })
            .await
            .unwrap();
        assert_eq!(store.saved().await.len(), 1);
        let filter = ResultFilter {
            server_id: Some(4),
            ..Default::default()
        };
        assert!(store.results(&filter).await.unwrap().is_empty());
    }
}
