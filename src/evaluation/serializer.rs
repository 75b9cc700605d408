//! 评测串行化器
//!
//! 评测器只能在一个专用线程上运行，这个线程独占评测器。调用方需要先取得全局锁才能提交请求，
//! 因此任意时刻最多只有一次评测在进行。专用线程在每次评测之后都会重置评测器，
//! 调用方要等到重置完成才释放锁，超时的评测也不例外。
//!
//! 超时的评测会收到取消信号，但不会被强行中止；如果它在收尾时间内仍未结束并完成重置，
//! 本次请求报错，串行化器保留它的事件通道。之后的请求先在锁内等待这次重置，
//! 重置完成后照常评测，仍未完成则继续报错，绝不在脏状态上评测。
//! 只有重置本身崩溃或评测线程退出时，串行化器才永久不可用。

use super::{EvaluationCache, EvaluationResult, TIMEOUT_REASON};
use crate::candidate::Config;
use crate::evaluators::{CancellationFlag, EvaluatorFailure, Metrics, ResettableEvaluator};
use crate::Error;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info, instrument, warn};

struct Job {
    config: Config,
    cancel: CancellationFlag,
    reply: Sender<WorkerEvent>,
}

enum WorkerEvent {
    Finished(Result<Metrics, EvaluatorFailure>),
    Reset,
    ResetFailed(String),
}

struct Worker {
    jobs: Sender<Job>,
    /// 已经超时、尚未完成重置的那次评测的事件通道
    pending: Option<Receiver<WorkerEvent>>,
    /// 为假时评测器的状态不可信
    healthy: bool,
}

pub struct EvaluationSerializer {
    gate: Mutex<Worker>,
    cache: Arc<EvaluationCache>,
    settle_timeout: Duration,
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "evaluator panicked".to_string()
    }
}

fn run_worker<E: ResettableEvaluator>(mut evaluator: E, jobs: Receiver<Job>) {
    for Job {
        config,
        cancel,
        reply,
    } in jobs
    {
        let outcome = catch_unwind(AssertUnwindSafe(|| evaluator.evaluate(&config, &cancel)))
            .unwrap_or_else(|payload| Err(EvaluatorFailure::new(panic_message(payload))));
        // 调用方可能已经因为超时离开，发送失败不影响重置
        let _ = reply.send(WorkerEvent::Finished(outcome));
        let event = match catch_unwind(AssertUnwindSafe(|| evaluator.reset())) {
            Ok(()) => WorkerEvent::Reset,
            Err(payload) => WorkerEvent::ResetFailed(panic_message(payload)),
        };
        let _ = reply.send(event);
    }
    info!("评测线程退出");
}

impl EvaluationSerializer {
    /// 启动专用评测线程；启动前先重置一次评测器
    pub fn spawn<E>(
        mut evaluator: E,
        cache: Arc<EvaluationCache>,
        settle_timeout: Duration,
    ) -> Result<Self, Error>
    where
        E: ResettableEvaluator + 'static,
    {
        evaluator.reset();
        let (jobs, receiver) = channel();
        thread::Builder::new()
            .name("evaluator".into())
            .spawn(move || run_worker(evaluator, receiver))?;
        Ok(Self {
            gate: Mutex::new(Worker {
                jobs,
                pending: None,
                healthy: true,
            }),
            cache,
            settle_timeout,
        })
    }

    pub fn cache(&self) -> &Arc<EvaluationCache> {
        &self.cache
    }

    /// 独占地评测一个配置，并把结果写入缓存
    ///
    /// 评测失败和超时都体现在返回的 [`EvaluationResult`] 里；只有串行化器自身的问题
    /// （锁中毒、评测线程退出、上一次评测仍未完成重置）才会返回错误。
    #[instrument(skip_all, fields(instances = config.total_instances()))]
    pub fn evaluate(&self, config: &Config, timeout: Duration) -> Result<EvaluationResult, Error> {
        let fingerprint = config.fingerprint();
        let result = {
            let mut worker = self
                .gate
                .lock()
                .map_err(|_| Error::LockPoisoned("evaluation serializer"))?;
            if !worker.healthy {
                return Err(Error::EvaluatorUnavailable(
                    "评测器重置失败或评测线程已退出".into(),
                ));
            }
            if let Some(events) = worker.pending.take() {
                info!("等待上一次超时的评测完成重置");
                self.settle(&mut worker, events)?;
            }
            // 排队期间可能已有会话评测过同一个配置
            if let Some(cached) = self.cache.lookup(&fingerprint) {
                return Ok(cached);
            }
            self.run(&mut worker, config, timeout)?
        };
        self.cache.store(fingerprint, result.clone());
        Ok(result)
    }

    fn run(
        &self,
        worker: &mut Worker,
        config: &Config,
        timeout: Duration,
    ) -> Result<EvaluationResult, Error> {
        let (reply, events) = channel();
        let cancel = CancellationFlag::default();
        let job = Job {
            config: config.clone(),
            cancel: cancel.clone(),
            reply,
        };
        if worker.jobs.send(job).is_err() {
            worker.healthy = false;
            return Err(Error::EvaluatorUnavailable("评测线程已退出".into()));
        }
        let started = Instant::now();
        info!("开始评测");
        let result = match events.recv_timeout(timeout) {
            Ok(WorkerEvent::Finished(outcome)) => {
                let result = EvaluationResult::classify(outcome);
                info!(
                    "评测结束，用时 {:?}，失败原因: {:?}",
                    started.elapsed(),
                    result.failure
                );
                result
            }
            Ok(_) => {
                worker.healthy = false;
                return Err(Error::EvaluatorUnavailable("评测线程的事件顺序错乱".into()));
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!("评测超过 {:?}，发出取消信号", timeout);
                cancel.cancel();
                EvaluationResult::failed(TIMEOUT_REASON)
            }
            Err(RecvTimeoutError::Disconnected) => {
                worker.healthy = false;
                return Err(Error::EvaluatorUnavailable("评测线程已退出".into()));
            }
        };
        self.settle(worker, events)?;
        Ok(result)
    }

    /// 等待评测线程完成重置；超时则把事件通道留给下一次请求
    fn settle(&self, worker: &mut Worker, events: Receiver<WorkerEvent>) -> Result<(), Error> {
        let deadline = Instant::now() + self.settle_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match events.recv_timeout(remaining) {
                Ok(WorkerEvent::Finished(_)) => continue,
                Ok(WorkerEvent::Reset) => {
                    info!("评测器已重置");
                    return Ok(());
                }
                Ok(WorkerEvent::ResetFailed(message)) => {
                    error!("评测器重置失败: {message}");
                    worker.healthy = false;
                    return Err(Error::EvaluatorUnavailable(message));
                }
                Err(RecvTimeoutError::Timeout) => {
                    error!("评测器在 {:?} 内没有完成重置", self.settle_timeout);
                    worker.pending = Some(events);
                    return Err(Error::EvaluatorUnresponsive(self.settle_timeout));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    worker.healthy = false;
                    return Err(Error::EvaluatorUnavailable("评测线程已退出".into()));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::tests::sample_structure;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 记录调用次数；`hang` 为真时无视取消信号一直运行
    struct Scripted {
        calls: Arc<AtomicUsize>,
        resets: Arc<AtomicUsize>,
        delay: Duration,
        hang: bool,
    }

    impl ResettableEvaluator for Scripted {
        fn evaluate(
            &mut self,
            config: &Config,
            cancel: &CancellationFlag,
        ) -> Result<Metrics, EvaluatorFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let started = Instant::now();
            while started.elapsed() < self.delay {
                if cancel.is_cancelled() && !self.hang {
                    return Err(EvaluatorFailure::new("cancelled"));
                }
                thread::sleep(Duration::from_millis(5));
            }
            if config.counts()[0] == 9 {
                panic!("bad slot");
            }
            Ok(Metrics {
                execution_time: config.total_instances() as f64,
                total_tasks: 1,
                completed_tasks: 1,
                ..Metrics::default()
            })
        }

        fn reset(&mut self) {
            self.resets.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn serializer(delay: Duration, hang: bool) -> (EvaluationSerializer, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        serializer_settling_within(delay, hang, Duration::from_millis(300))
    }

    fn serializer_settling_within(
        delay: Duration,
        hang: bool,
        settle_timeout: Duration,
    ) -> (EvaluationSerializer, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let resets = Arc::new(AtomicUsize::new(0));
        let evaluator = Scripted {
            calls: calls.clone(),
            resets: resets.clone(),
            delay,
            hang,
        };
        let cache = Arc::new(EvaluationCache::new(100, Duration::from_secs(60)));
        let serializer =
            EvaluationSerializer::spawn(evaluator, cache, settle_timeout).unwrap();
        (serializer, calls, resets)
    }

    fn config(counts: Vec<u32>) -> Config {
        Config::new(sample_structure().to_layout().unwrap(), counts).unwrap()
    }

    #[test]
    fn result_is_cached_and_reset_always_runs() {
        let (serializer, calls, resets) = serializer(Duration::ZERO, false);
        // spawn 时重置一次
        assert_eq!(resets.load(Ordering::SeqCst), 1);
        let first = serializer
            .evaluate(&config(vec![1, 2, 0]), Duration::from_secs(1))
            .unwrap();
        assert_eq!(first.execution_time, 3.0);
        assert_eq!(resets.load(Ordering::SeqCst), 2);
        let second = serializer
            .evaluate(&config(vec![1, 2, 0]), Duration::from_secs(1))
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(serializer.cache().len(), 1);
    }

    #[test]
    fn panic_becomes_a_failed_result() {
        let (serializer, _, resets) = serializer(Duration::ZERO, false);
        let result = serializer
            .evaluate(&config(vec![9, 0, 0]), Duration::from_secs(1))
            .unwrap();
        assert_eq!(result.failure.as_deref(), Some("bad slot"));
        assert_eq!(resets.load(Ordering::SeqCst), 2);
        // 之后的评测不受影响
        let next = serializer
            .evaluate(&config(vec![1, 0, 0]), Duration::from_secs(1))
            .unwrap();
        assert!(!next.is_failed());
    }

    #[test]
    fn timeout_is_reported_and_followed_by_reset() {
        let (serializer, _, resets) = serializer(Duration::from_millis(200), false);
        let result = serializer
            .evaluate(&config(vec![1, 0, 0]), Duration::from_millis(50))
            .unwrap();
        assert_eq!(result.failure.as_deref(), Some(TIMEOUT_REASON));
        assert_eq!(resets.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn requests_fail_while_a_hung_run_is_still_resetting() {
        let (serializer, calls, _) = serializer(Duration::from_millis(1_000), true);
        let err = serializer
            .evaluate(&config(vec![1, 0, 0]), Duration::from_millis(20))
            .unwrap_err();
        assert!(matches!(err, Error::EvaluatorUnresponsive(_)));
        // 第一次评测仍在运行，新的请求不会被提交给评测器
        let err = serializer
            .evaluate(&config(vec![2, 0, 0]), Duration::from_millis(20))
            .unwrap_err();
        assert!(matches!(err, Error::EvaluatorUnresponsive(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn serializer_recovers_once_the_hung_run_has_reset() {
        let (serializer, calls, resets) = serializer_settling_within(
            Duration::from_millis(300),
            true,
            Duration::from_millis(50),
        );
        let err = serializer
            .evaluate(&config(vec![1, 0, 0]), Duration::from_millis(20))
            .unwrap_err();
        assert!(matches!(err, Error::EvaluatorUnresponsive(_)));
        thread::sleep(Duration::from_millis(600));
        let result = serializer
            .evaluate(&config(vec![2, 0, 0]), Duration::from_secs(2))
            .unwrap();
        assert_eq!(result.failure, None);
        assert_eq!(result.execution_time, 2.0);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        // 启动时、超时的评测之后、本次评测之后各一次
        assert_eq!(resets.load(Ordering::SeqCst), 3);
    }
}
