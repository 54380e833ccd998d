// 常量定义

pub mod ssh {
    pub const DEFAULT_PORT: u16 = 22;
    pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;
    pub const DEFAULT_KEEPALIVE_INTERVAL_SECS: u64 = 30;
    /// 断开连接时等待 disconnect 消息发出的上限
    pub const DISCONNECT_TIMEOUT_SECS: u64 = 5;
    /// SSH_EXTENDED_DATA_STDERR
    pub const EXTENDED_DATA_STDERR: u32 = 1;
}

pub mod tunnel {
    /// 本地监听与本地转发目标都固定在回环地址
    pub const LOOPBACK_HOST: &str = "127.0.0.1";
    /// 远程转发请求远端在所有网卡上监听
    pub const REMOTE_BIND_ALL: &str = "0.0.0.0";
    /// 检查 SSH 连接是否已断开的间隔
    pub const HEALTH_CHECK_INTERVAL_SECS: u64 = 5;
    /// SOCKS5 方法协商与 CONNECT 请求各自的读取上限
    pub const SOCKS5_HANDSHAKE_TIMEOUT_SECS: u64 = 10;
}

pub mod checks {
    pub const CONNECTION_TEST_COMMAND: &str = "echo \"Connection test\"";

    /// (id, name, command, description)
    pub const DEFAULT_CHECK_COMMANDS: &[(i64, &str, &str, &str)] = &[
        (1, "Disk Usage", "df -h", "Check disk usage"),
        (2, "Memory Usage", "free -h", "Check memory usage"),
        (3, "CPU Load", "uptime", "Check CPU load and uptime"),
        (
            4,
            "Running Processes",
            "ps aux --sort=-%cpu | head -20",
            "Top CPU consuming processes",
        ),
        (
            5,
            "Network Status",
            "netstat -tuln | head -20",
            "Listening network ports",
        ),
        (6, "System Info", "uname -a", "Kernel and system information"),
        (
            7,
            "Disk I/O",
            "iostat 1 5 2>/dev/null || echo \"iostat not available\"",
            "Disk I/O statistics",
        ),
    ];
}
