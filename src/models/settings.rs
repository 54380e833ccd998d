// Settings 配置数据结构

use serde::{Deserialize, Serialize};

use crate::constants::ssh::{DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_KEEPALIVE_INTERVAL_SECS};

// ======================== 主配置结构 ========================

/// 应用设置（持久化用）
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppSettings {
    pub connection: ConnectionSettings,
    pub batch: BatchSettings,
}

// ======================== 连接设置 ========================

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConnectionSettings {
    pub connection_timeout_secs: u32,
    /// 0 表示关闭心跳
    pub keepalive_interval_secs: u32,
    pub keepalive_max: u32,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connection_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS as u32,
            keepalive_interval_secs: DEFAULT_KEEPALIVE_INTERVAL_SECS as u32,
            keepalive_max: 3,
        }
    }
}

// ======================== 批量执行设置 ========================

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BatchSettings {
    /// 结果查询默认条数
    pub results_page_size: usize,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            results_page_size: 100,
        }
    }
}
