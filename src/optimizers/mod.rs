//! 搜索方法接口，以及随机搜索和遗传算法的实现
//!

use crate::evaluation::{Evaluation, EvaluationResult};
use crate::interfaces::{Interface, Message};
use crate::objectives::Objective;
use crate::session::{Session, StrategyKind};
use crate::Error;
use tracing::error;

pub mod genetic;
pub mod random_search;

/// 搜索线程可用的全部协作者
pub struct SearchContext<'a> {
    pub session: &'a Session,
    pub evaluation: &'a Evaluation,
    pub objective: &'a dyn Objective,
    pub interface: &'a dyn Interface,
}

impl SearchContext<'_> {
    pub fn stopped(&self) -> bool {
        self.session.is_stopping()
    }

    /// 评测会话中的一条记录并返回适应度
    ///
    /// 评测通道本身出错时，错误被记录为这条记录的失败原因，不会中止会话。
    pub fn evaluate(&self, index: usize) -> Result<f64, Error> {
        let config = self.session.begin(index)?;
        let result = self.evaluation.evaluate(&config).unwrap_or_else(|e| {
            error!("评测通道出错: {e}");
            EvaluationResult::failed(e.to_string())
        });
        let fitness = self.objective.score(&result);
        let record = self.session.complete(index, result, fitness)?;
        self.interface.post(Message::RecordFinished {
            session: self.session.id(),
            record: record.id,
            generation: record.generation,
            fitness,
            failure: record.result.and_then(|r| r.failure),
        });
        Ok(fitness)
    }
}

/// 一种搜索方法；`run` 在会话自己的线程上执行，返回即表示搜索结束
pub trait Strategy: Send {
    fn kind(&self) -> StrategyKind;

    fn run(&mut self, context: &SearchContext) -> Result<(), Error>;
}
