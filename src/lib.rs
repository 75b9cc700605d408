//! fogopt 是雾计算基础设施结构的优化库。用户给出计算机型号、区域和实例列表，
//! 本库用随机搜索或遗传算法决定每个实例部署多少台机器，使工作流的执行时间、价格和能耗的加权和最优。
//!
//! 每个候选配置都交给一个昂贵、有状态、不可重入的模拟器评测。所有会话共用一个评测通道：
//! 先查缓存，未命中时由全局唯一的串行化器独占地驱动模拟器，超时有上限，每次评测之后都重置模拟器。
//!
//! fogopt 同时是一个命令行程序，可以直接对结构文件运行搜索，也可以作为 HTTP 服务运行。

pub mod candidate;
pub mod config;
pub mod error;
pub mod evaluation;
pub mod evaluators;
pub mod interfaces;
pub mod objectives;
pub mod operators;
pub mod optimizers;
pub mod server;
pub mod session;
pub mod structure;

pub use error::Error;
pub use interfaces::{Interface, Message};

use tracing_subscriber::EnvFilter;

/// 初始化日志输出，日志级别由 RUST_LOG 控制，默认为 info
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // 重复初始化时保留已有的订阅者
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
