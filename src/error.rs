use std::time::Duration;
use uuid::Uuid;

/// 错误类型
///
/// 单次评测的失败（模拟器异常、超时、任务未全部完成）不是错误，它们记录在
/// [`crate::evaluation::EvaluationResult`] 里；这里只收录会中止某个操作的情况。
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("结构中存在无法解析的计算机实例: {instances:?}")]
    InvalidStructure { instances: Vec<String> },
    #[error("结构中没有任何计算机实例")]
    EmptyStructure,
    #[error("目标设置不合法: {0}")]
    InvalidGoal(String),
    #[error("槽位数量不一致: 期望 {expected}，实际 {actual}")]
    SlotCountMismatch { expected: usize, actual: usize },
    #[error("槽位 {slot} 的实例数 {count} 超出上限 {max}")]
    CountOutOfRange { slot: usize, count: u32, max: u32 },
    #[error("会话 {0} 不存在")]
    SessionNotFound(Uuid),
    #[error("记录 {0} 不存在")]
    RecordNotFound(usize),
    #[error("会话已经启动")]
    AlreadyStarted,
    #[error("锁已中毒: {0}")]
    LockPoisoned(&'static str),
    #[error("评测器不可用: {0}")]
    EvaluatorUnavailable(String),
    #[error("评测器在 {0:?} 内没有完成重置")]
    EvaluatorUnresponsive(Duration),
    #[error("配置错误: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl From<String> for Error {
    fn from(value: String) -> Self {
        Self::Config(value)
    }
}

impl From<&str> for Error {
    fn from(value: &str) -> Self {
        Self::Config(value.to_string())
    }
}
