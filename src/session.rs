//! 优化会话
//!
//! 一个会话拥有一次搜索及其全部记录。记录只由会话自己的搜索线程追加和更新，
//! 观察者可以随时并发读取快照；每次变更都会推进更新令牌，轮询方据此判断是否有新数据。

use crate::candidate::Config;
use crate::config::{GeneticSettings, GoalSettings, RandomSettings, Settings};
use crate::evaluation::{Evaluation, EvaluationResult};
use crate::interfaces::{Interface, Message};
use crate::objectives::default::WeightedObjective;
use crate::objectives::Objective;
use crate::optimizers::genetic::GeneticSearch;
use crate::optimizers::random_search::RandomSearch;
use crate::optimizers::{SearchContext, Strategy};
use crate::structure::Structure;
use crate::Error;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::{self, JoinHandle};
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StrategyKind {
    Random,
    Genetic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RecordStatus {
    Waiting,
    Processing,
    Finished,
    /// 会话停止时尚未评测的记录
    Cancelled,
}

impl RecordStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Cancelled)
    }
}

/// 一个被评测的候选配置
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: Uuid,
    pub config: Config,
    pub generation: u64,
    pub status: RecordStatus,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub fitness: Option<f64>,
    pub result: Option<EvaluationResult>,
    pub is_best_of_generation: bool,
}

impl Record {
    fn succeeded(&self) -> Option<&EvaluationResult> {
        self.result.as_ref().filter(|r| !r.is_failed())
    }
}

/// 会话的更新令牌，每次变更都会改变
pub type UpdateToken = u64;

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub total: usize,
    pub finished: usize,
    pub failed: usize,
    pub cancelled: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub kind: StrategyKind,
    pub goal_settings: GoalSettings,
    pub records: Vec<Record>,
    pub is_done: bool,
    pub last_updated: UpdateToken,
    pub updated_at: DateTime<Utc>,
    pub current_generation: u64,
    pub statistics: Statistics,
    pub best_by_time: Option<Record>,
    pub best_by_cost: Option<Record>,
    pub best_by_energy: Option<Record>,
}

/// 会话列表中的一项
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: Uuid,
    pub kind: StrategyKind,
    pub is_done: bool,
    pub last_updated: UpdateToken,
    pub statistics: Statistics,
}

struct SessionState {
    records: Vec<Record>,
    version: UpdateToken,
    updated_at: DateTime<Utc>,
    current_generation: u64,
    done: bool,
}

impl SessionState {
    fn touch(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }

    fn statistics(&self) -> Statistics {
        let mut statistics = Statistics {
            total: self.records.len(),
            ..Statistics::default()
        };
        for record in &self.records {
            match record.status {
                RecordStatus::Finished => {
                    statistics.finished += 1;
                    if record.succeeded().is_none() {
                        statistics.failed += 1;
                    }
                }
                RecordStatus::Cancelled => statistics.cancelled += 1,
                _ => {}
            }
        }
        statistics
    }

    /// 成功的记录中某项指标最小的一个
    fn best_by(&self, metric: impl Fn(&EvaluationResult) -> f64) -> Option<Record> {
        self.records
            .iter()
            .filter_map(|record| record.succeeded().map(|result| (record, metric(result))))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(record, _)| record.clone())
    }
}

pub struct Session {
    id: Uuid,
    kind: StrategyKind,
    goal: GoalSettings,
    state: RwLock<SessionState>,
    stopping: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    pub fn new(kind: StrategyKind, goal: GoalSettings) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            goal,
            state: RwLock::new(SessionState {
                records: vec![],
                version: 0,
                updated_at: Utc::now(),
                current_generation: 0,
                done: false,
            }),
            stopping: AtomicBool::new(false),
            worker: Mutex::new(None),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> StrategyKind {
        self.kind
    }

    pub fn goal(&self) -> &GoalSettings {
        &self.goal
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, SessionState>, Error> {
        self.state.read().map_err(|_| Error::LockPoisoned("session"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, SessionState>, Error> {
        self.state.write().map_err(|_| Error::LockPoisoned("session"))
    }

    /// 在独立的线程上运行搜索，线程结束时会话标记为完成
    pub fn start(
        self: &Arc<Self>,
        mut strategy: Box<dyn Strategy>,
        evaluation: Evaluation,
        objective: Arc<dyn Objective>,
        interface: Arc<dyn Interface>,
    ) -> Result<(), Error> {
        let mut worker = self
            .worker
            .lock()
            .map_err(|_| Error::LockPoisoned("session worker"))?;
        if worker.is_some() {
            return Err(Error::AlreadyStarted);
        }
        let session = self.clone();
        let handle = thread::Builder::new()
            .name(format!("session-{}", self.id.simple()))
            .spawn(move || {
                interface.post(Message::SessionStarted {
                    session: session.id,
                    kind: session.kind,
                });
                let context = SearchContext {
                    session: &session,
                    evaluation: &evaluation,
                    objective: objective.as_ref(),
                    interface: interface.as_ref(),
                };
                match catch_unwind(AssertUnwindSafe(|| strategy.run(&context))) {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => error!("会话 {} 的搜索异常结束: {e}", session.id),
                    Err(_) => {
                        error!("会话 {} 的搜索线程崩溃", session.id);
                        if let Err(e) = session.cancel_pending() {
                            error!("无法取消会话 {} 中未评测的记录: {e}", session.id);
                        }
                    }
                }
                let records = session.finish();
                info!("会话 {} 结束，共 {} 条记录", session.id, records);
                interface.post(Message::SessionFinished {
                    session: session.id,
                    records,
                    stopped: session.is_stopping(),
                });
            })?;
        *worker = Some(handle);
        Ok(())
    }

    /// 请求停止：不再发起新的评测，正在进行的评测照常完成
    pub fn stop(&self) {
        if !self.stopping.swap(true, Ordering::SeqCst) {
            info!("会话 {} 收到停止请求", self.id);
        }
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    pub fn is_done(&self) -> Result<bool, Error> {
        Ok(self.read()?.done)
    }

    /// 等待搜索线程结束
    pub fn wait(&self) -> Result<(), Error> {
        let handle = self
            .worker
            .lock()
            .map_err(|_| Error::LockPoisoned("session worker"))?
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("会话 {} 的搜索线程崩溃", self.id);
                self.finish();
            }
        }
        Ok(())
    }

    pub fn records(&self) -> Result<Vec<Record>, Error> {
        Ok(self.read()?.records.clone())
    }

    pub fn token(&self) -> Result<UpdateToken, Error> {
        Ok(self.read()?.version)
    }

    pub fn snapshot(&self) -> Result<SessionSnapshot, Error> {
        let state = self.read()?;
        Ok(SessionSnapshot {
            id: self.id,
            kind: self.kind,
            goal_settings: self.goal.clone(),
            records: state.records.clone(),
            is_done: state.done,
            last_updated: state.version,
            updated_at: state.updated_at,
            current_generation: state.current_generation,
            statistics: state.statistics(),
            best_by_time: state.best_by(|r| r.execution_time),
            best_by_cost: state.best_by(|r| r.total_cost),
            best_by_energy: state.best_by(|r| r.total_energy),
        })
    }

    /// 令牌未变化时返回 `None`
    pub fn snapshot_since(&self, token: UpdateToken) -> Result<Option<SessionSnapshot>, Error> {
        if self.token()? == token {
            return Ok(None);
        }
        self.snapshot().map(Some)
    }

    pub fn summary(&self) -> Result<SessionSummary, Error> {
        let state = self.read()?;
        Ok(SessionSummary {
            id: self.id,
            kind: self.kind,
            is_done: state.done,
            last_updated: state.version,
            statistics: state.statistics(),
        })
    }

    /// 追加一条等待评测的记录，返回它的下标
    pub fn issue(&self, config: Config, generation: u64) -> Result<usize, Error> {
        let mut state = self.write()?;
        state.records.push(Record {
            id: Uuid::new_v4(),
            config,
            generation,
            status: RecordStatus::Waiting,
            created_at: Utc::now(),
            finished_at: None,
            fitness: None,
            result: None,
            is_best_of_generation: false,
        });
        state.touch();
        Ok(state.records.len() - 1)
    }

    /// 把记录标记为评测中，返回它的配置
    pub fn begin(&self, index: usize) -> Result<Config, Error> {
        let mut state = self.write()?;
        let record = state
            .records
            .get_mut(index)
            .ok_or(Error::RecordNotFound(index))?;
        record.status = RecordStatus::Processing;
        let config = record.config.clone();
        state.touch();
        Ok(config)
    }

    pub fn complete(
        &self,
        index: usize,
        result: EvaluationResult,
        fitness: f64,
    ) -> Result<Record, Error> {
        let mut state = self.write()?;
        let record = state
            .records
            .get_mut(index)
            .ok_or(Error::RecordNotFound(index))?;
        record.status = RecordStatus::Finished;
        record.finished_at = Some(Utc::now());
        record.fitness = Some(fitness);
        record.result = Some(result);
        let record = record.clone();
        state.touch();
        Ok(record)
    }

    /// 把所有尚未开始的记录标记为取消，返回数量
    pub fn cancel_pending(&self) -> Result<usize, Error> {
        let mut state = self.write()?;
        let mut cancelled = 0;
        for record in &mut state.records {
            if record.status == RecordStatus::Waiting {
                record.status = RecordStatus::Cancelled;
                record.finished_at = Some(Utc::now());
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            state.touch();
        }
        Ok(cancelled)
    }

    pub fn set_generation(&self, generation: u64) -> Result<(), Error> {
        let mut state = self.write()?;
        state.current_generation = generation;
        state.touch();
        Ok(())
    }

    /// 标记所有实例数与 `counts` 完全一致的记录，返回标记的数量
    pub fn tag_best(&self, counts: &[u32]) -> Result<usize, Error> {
        let mut state = self.write()?;
        let mut tagged = 0;
        for record in &mut state.records {
            if record.status == RecordStatus::Finished && record.config.counts() == counts {
                record.is_best_of_generation = true;
                tagged += 1;
            }
        }
        state.touch();
        Ok(tagged)
    }

    fn finish(&self) -> usize {
        match self.state.write() {
            Ok(mut state) => {
                state.done = true;
                state.touch();
                state.records.len()
            }
            Err(_) => 0,
        }
    }
}

/// 进程内的会话注册表，所有会话共用同一个评测通道
pub struct OptimizationService {
    sessions: RwLock<HashMap<Uuid, Arc<Session>>>,
    evaluation: Evaluation,
    random: RandomSettings,
    genetic: GeneticSettings,
    interface: Arc<dyn Interface>,
}

impl OptimizationService {
    pub fn new(evaluation: Evaluation, settings: &Settings, interface: Arc<dyn Interface>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            evaluation,
            random: settings.random,
            genetic: settings.genetic,
            interface,
        }
    }

    pub fn evaluation(&self) -> &Evaluation {
        &self.evaluation
    }

    /// 校验结构并启动一个会话；结构不合法时不会创建会话
    pub fn create_session(
        &self,
        kind: StrategyKind,
        goal: GoalSettings,
        structure: &Structure,
    ) -> Result<Uuid, Error> {
        goal.validate()?;
        let layout = structure.to_layout()?;
        let strategy: Box<dyn Strategy> = match kind {
            StrategyKind::Random => Box::new(RandomSearch::new(layout, self.random)),
            StrategyKind::Genetic => {
                self.genetic.validate()?;
                let mut search = GeneticSearch::new(layout, &goal, self.genetic);
                if let Some(seed) = self.genetic.seed {
                    search = search.with_seed(seed);
                }
                Box::new(search)
            }
        };
        let objective: Arc<dyn Objective> = Arc::new(WeightedObjective::new(&goal));
        let session = Arc::new(Session::new(kind, goal));
        let id = session.id();
        self.sessions
            .write()
            .map_err(|_| Error::LockPoisoned("session registry"))?
            .insert(id, session.clone());
        session.start(
            strategy,
            self.evaluation.clone(),
            objective,
            self.interface.clone(),
        )?;
        info!("创建 {:?} 会话 {}", kind, id);
        Ok(id)
    }

    /// 随机搜索只用适应度做记录，默认以最小化时间为目标
    pub fn start_random(&self, structure: &Structure) -> Result<Uuid, Error> {
        let goal = GoalSettings {
            minimizing_cost: true,
            ..GoalSettings::default()
        };
        self.create_session(StrategyKind::Random, goal, structure)
    }

    pub fn start_genetic(&self, structure: &Structure, goal: GoalSettings) -> Result<Uuid, Error> {
        self.create_session(StrategyKind::Genetic, goal, structure)
    }

    pub fn session(&self, id: Uuid) -> Result<Arc<Session>, Error> {
        self.sessions
            .read()
            .map_err(|_| Error::LockPoisoned("session registry"))?
            .get(&id)
            .cloned()
            .ok_or(Error::SessionNotFound(id))
    }

    pub fn get_session(&self, id: Uuid) -> Result<SessionSnapshot, Error> {
        self.session(id)?.snapshot()
    }

    pub fn get_session_since(
        &self,
        id: Uuid,
        token: UpdateToken,
    ) -> Result<Option<SessionSnapshot>, Error> {
        self.session(id)?.snapshot_since(token)
    }

    pub fn stop_session(&self, id: Uuid) -> Result<(), Error> {
        self.session(id)?.stop();
        Ok(())
    }

    pub fn list_sessions(&self) -> Result<Vec<SessionSummary>, Error> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| Error::LockPoisoned("session registry"))?;
        let mut summaries = sessions
            .values()
            .map(|session| session.summary())
            .collect::<Result<Vec<_>, _>>()?;
        summaries.sort_by_key(|s| s.id);
        Ok(summaries)
    }
}
