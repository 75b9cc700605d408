//! 评测器接口
//!
//! 评测器是一个昂贵的黑盒：给定一个候选配置，模拟工作流在其上的执行并返回汇总指标。
//! 评测器持有进程级的可变状态，既不可重入，也不能与自身并发运行；每次评测之后，
//! 无论结果如何，都必须调用 [`ResettableEvaluator::reset`] 把这些状态清空。
//! 只有 [`crate::evaluation::serializer::EvaluationSerializer`] 会调用这两个方法。

use crate::candidate::Config;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub mod synthetic;

/// 一次模拟的汇总指标
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    pub total_cost: f64,
    pub total_energy: f64,
    /// 单位为秒
    pub execution_time: f64,
    pub total_tasks: u64,
    pub completed_tasks: u64,
}

impl Metrics {
    pub fn all_tasks_completed(&self) -> bool {
        self.completed_tasks >= self.total_tasks
    }
}

/// 评测器报告的失败，可能附带失败前已经收集到的部分指标
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct EvaluatorFailure {
    pub message: String,
    pub partial: Option<Metrics>,
}

impl EvaluatorFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            partial: None,
        }
    }

    pub fn with_partial(message: impl Into<String>, partial: Metrics) -> Self {
        Self {
            message: message.into(),
            partial: Some(partial),
        }
    }
}

/// 协作式取消标记，评测器应当在合适的时机检查它并尽快返回
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// 可重置的评测器
pub trait ResettableEvaluator: Send {
    fn evaluate(
        &mut self,
        config: &Config,
        cancel: &CancellationFlag,
    ) -> Result<Metrics, EvaluatorFailure>;

    /// 把评测器的全部进程级状态恢复到初始值
    fn reset(&mut self);
}

impl<E: ResettableEvaluator + ?Sized> ResettableEvaluator for Box<E> {
    fn evaluate(
        &mut self,
        config: &Config,
        cancel: &CancellationFlag,
    ) -> Result<Metrics, EvaluatorFailure> {
        (**self).evaluate(config, cancel)
    }

    fn reset(&mut self) {
        (**self).reset()
    }
}
