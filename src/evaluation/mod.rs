//! 评测通道：缓存、串行化器，以及把两者串起来的 [`Evaluation`]
//!
//! 一个候选配置先查缓存，未命中时交给全局唯一的串行化器，由它独占地驱动评测器。

use crate::candidate::Config;
use crate::evaluators::{EvaluatorFailure, Metrics};
use crate::Error;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub mod cache;
pub mod serializer;

pub use cache::EvaluationCache;
pub use serializer::EvaluationSerializer;

pub const TIMEOUT_REASON: &str = "evaluation timed out";
pub const INCOMPLETE_REASON: &str = "Not all tasks were completed";

/// 失败结果的数值字段统一填这个值
pub const SENTINEL: f64 = -1.0;

/// 评测结果
///
/// `failure` 非空时，`total_cost`、`total_energy`、`execution_time` 都是 [`SENTINEL`]，不应参与任何比较。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    pub total_cost: f64,
    pub total_energy: f64,
    /// 单位为秒
    pub execution_time: f64,
    pub total_tasks: u64,
    pub completed_tasks: u64,
    pub failure: Option<String>,
    /// 异常检测与任务完成度检测给出了不同的结论
    #[serde(default)]
    pub detectors_disagree: bool,
}

impl EvaluationResult {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            total_cost: SENTINEL,
            total_energy: SENTINEL,
            execution_time: SENTINEL,
            total_tasks: 0,
            completed_tasks: 0,
            failure: Some(reason.into()),
            detectors_disagree: false,
        }
    }

    /// 综合两个相互独立的失败检测：评测器是否报告了异常，以及任务是否全部完成。
    /// 任意一个判定失败，结果即为失败；两者结论不一致时记录下来。
    pub fn classify(outcome: Result<Metrics, EvaluatorFailure>) -> Self {
        match outcome {
            Ok(metrics) if metrics.all_tasks_completed() => Self::from(metrics),
            Ok(metrics) => {
                warn!(
                    "评测器未报告异常，但只完成了 {}/{} 个任务",
                    metrics.completed_tasks, metrics.total_tasks
                );
                Self {
                    total_tasks: metrics.total_tasks,
                    completed_tasks: metrics.completed_tasks,
                    detectors_disagree: true,
                    ..Self::failed(INCOMPLETE_REASON)
                }
            }
            Err(EvaluatorFailure { message, partial }) => {
                let mut result = Self::failed(message);
                if let Some(metrics) = partial {
                    result.total_tasks = metrics.total_tasks;
                    result.completed_tasks = metrics.completed_tasks;
                    if metrics.total_tasks > 0 && metrics.all_tasks_completed() {
                        warn!(
                            "评测器报告了异常，但 {} 个任务已全部完成: {:?}",
                            metrics.total_tasks, result.failure
                        );
                        result.detectors_disagree = true;
                    }
                }
                result
            }
        }
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    pub fn execution_minutes(&self) -> f64 {
        self.execution_time / 60.0
    }
}

impl From<Metrics> for EvaluationResult {
    fn from(metrics: Metrics) -> Self {
        Self {
            total_cost: metrics.total_cost,
            total_energy: metrics.total_energy,
            execution_time: metrics.execution_time,
            total_tasks: metrics.total_tasks,
            completed_tasks: metrics.completed_tasks,
            failure: None,
            detectors_disagree: false,
        }
    }
}

/// 缓存加串行化器，所有会话共用一个实例
#[derive(Clone)]
pub struct Evaluation {
    cache: Arc<EvaluationCache>,
    serializer: Arc<EvaluationSerializer>,
    timeout: Duration,
}

impl Evaluation {
    pub fn new(serializer: Arc<EvaluationSerializer>, timeout: Duration) -> Self {
        Self {
            cache: serializer.cache().clone(),
            serializer,
            timeout,
        }
    }

    pub fn cache(&self) -> &Arc<EvaluationCache> {
        &self.cache
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn evaluate(&self, config: &Config) -> Result<EvaluationResult, Error> {
        if let Some(result) = self.cache.lookup(&config.fingerprint()) {
            debug!("命中缓存");
            return Ok(result);
        }
        self.serializer.evaluate(config, self.timeout)
    }
}
