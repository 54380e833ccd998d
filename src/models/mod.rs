// 数据模型模块

pub mod command;
pub mod result;
pub mod server;
pub mod settings;
pub mod tunnel;

pub use command::CheckCommand;
pub use result::{CheckStatus, ExecutionResult};
pub use server::{AuthType, Server};
pub use settings::{AppSettings, BatchSettings, ConnectionSettings};
pub use tunnel::{Tunnel, TunnelType};
