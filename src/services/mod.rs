// 服务模块
//
// - executor: 单条命令执行 (CommandExecutor, CommandRunner)
// - batch: 批量执行编排与事件流
// - tunnel: 端口转发隧道管理
// - storage: 资产清单、执行结果与设置的持久化

pub mod batch;
pub mod executor;
pub mod storage;
pub mod tunnel;
