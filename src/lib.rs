// FleetCheck - 服务器巡检与 SSH 隧道核心库

pub mod constants;
pub mod models;
pub mod services;
pub mod ssh;
