use crate::session::StrategyKind;
use serde::Serialize;
use serde_with::skip_serializing_none;
use uuid::Uuid;

pub mod command_line;

/// 向用户反馈的消息类型
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    SessionStarted {
        session: Uuid,
        kind: StrategyKind,
    },
    RecordFinished {
        session: Uuid,
        record: Uuid,
        generation: u64,
        fitness: f64,
        failure: Option<String>,
    },
    GenerationFinished {
        session: Uuid,
        generation: u64,
        best_fitness: f64,
        failed: usize,
    },
    SessionFinished {
        session: Uuid,
        records: usize,
        stopped: bool,
    },
}

impl Message {
    pub fn session(&self) -> Uuid {
        match self {
            Self::SessionStarted { session, .. }
            | Self::RecordFinished { session, .. }
            | Self::GenerationFinished { session, .. }
            | Self::SessionFinished { session, .. } => *session,
        }
    }
}

/// 定义了向用户报告消息的接口，用于统一命令行和服务器的输出方式
///
/// 命令行、服务器只需要各自实现 post 方法，就可向用户报告搜索进度
pub trait Interface: Send + Sync {
    fn post(&self, message: Message);
}

/// 丢弃所有消息
pub struct Silent;

impl Interface for Silent {
    fn post(&self, _message: Message) {}
}
