//! 内置的工作流模拟器
//!
//! 这是一个确定性的列表调度模型：工作负载中的任务依次到达，每个任务被分派到能最早完成它的那个核上。
//! 和外部的离散事件模拟器一样，它把已注册的设备、事件时钟和能耗计量放在进程级的全局状态里，
//! 评测之间如果不调用 [`SyntheticEvaluator::reset`]，上一次的设备和时钟会残留到下一次。
//!
//! 时间单位为 tick，一个 tick 对应 1 毫秒，延迟也按 tick 计。

use super::{CancellationFlag, EvaluatorFailure, Metrics, ResettableEvaluator};
use crate::candidate::Config;
use crate::config::WorkloadSettings;
use std::sync::{Mutex, PoisonError};
use tracing::debug;

const TICKS_PER_SECOND: f64 = 1000.0;
const JOULES_PER_KWH: f64 = 3.6e6;
/// 每分派这么多个任务检查一次取消标记
const CANCEL_CHECK_INTERVAL: u32 = 16;

#[derive(Debug)]
struct Appliance {
    cores_free_at: Vec<u64>,
    processing_rate: f64,
    price_per_tick: f64,
    /// 从任务源区域到这台机器的延迟
    latency: u64,
    registered_at: u64,
    busy_ticks: u64,
}

#[derive(Debug)]
struct World {
    clock: u64,
    appliances: Vec<Appliance>,
    submitted: u64,
    completed: u64,
}

impl World {
    const EMPTY: World = World {
        clock: 0,
        appliances: Vec::new(),
        submitted: 0,
        completed: 0,
    };
}

static WORLD: Mutex<World> = Mutex::new(World::EMPTY);

pub struct SyntheticEvaluator {
    workload: WorkloadSettings,
}

impl SyntheticEvaluator {
    pub fn new(workload: WorkloadSettings) -> Self {
        Self { workload }
    }

    fn register(world: &mut World, config: &Config, source: &str) {
        let layout = config.layout();
        for (index, (slot, count)) in config.slots().enumerate() {
            let latency = layout.latency(index, source) as u64;
            for _ in 0..count {
                world.appliances.push(Appliance {
                    cores_free_at: vec![world.clock; slot.computer.cores as usize],
                    processing_rate: slot.computer.processing_rate,
                    price_per_tick: slot.computer.price_per_tick,
                    latency,
                    registered_at: world.clock,
                    busy_ticks: 0,
                });
            }
        }
    }

    /// 能最早完成一个任务的核，以及它的开始和结束时刻
    fn earliest_core(world: &World, start: u64, instructions: f64) -> Option<(usize, usize, u64, u64)> {
        let mut best: Option<(usize, usize, u64, u64)> = None;
        for (a, appliance) in world.appliances.iter().enumerate() {
            if appliance.processing_rate <= 0.0 {
                continue;
            }
            let duration = (instructions / appliance.processing_rate).ceil() as u64;
            let arrival = start.saturating_add(appliance.latency);
            for (c, &free_at) in appliance.cores_free_at.iter().enumerate() {
                let begin = free_at.max(arrival);
                let finish = begin.saturating_add(duration);
                if best.is_none_or(|(_, _, _, f)| finish < f) {
                    best = Some((a, c, begin, finish));
                }
            }
        }
        best
    }

    fn collect(&self, world: &World) -> Metrics {
        let clock = world.clock;
        let mut total_cost = 0.0;
        let mut joules = 0.0;
        for appliance in &world.appliances {
            let rented = clock.saturating_sub(appliance.registered_at) as f64;
            total_cost += appliance.price_per_tick * rented;
            let cores = appliance.cores_free_at.len() as f64;
            joules += cores * self.workload.idle_power * rented / TICKS_PER_SECOND;
            joules += (self.workload.busy_power - self.workload.idle_power)
                * appliance.busy_ticks as f64
                / TICKS_PER_SECOND;
        }
        Metrics {
            total_cost,
            total_energy: joules / JOULES_PER_KWH,
            execution_time: clock as f64 / TICKS_PER_SECOND,
            total_tasks: world.submitted,
            completed_tasks: world.completed,
        }
    }
}

impl ResettableEvaluator for SyntheticEvaluator {
    fn evaluate(
        &mut self,
        config: &Config,
        cancel: &CancellationFlag,
    ) -> Result<Metrics, EvaluatorFailure> {
        let mut world = WORLD
            .lock()
            .map_err(|_| EvaluatorFailure::new("simulation state is poisoned"))?;
        let source = match &self.workload.source_region {
            Some(region) => region.clone(),
            None => config
                .layout()
                .slots()
                .first()
                .map(|slot| slot.region.name.clone())
                .unwrap_or_default(),
        };
        Self::register(&mut world, config, &source);
        if world.appliances.is_empty() {
            return Err(EvaluatorFailure::new(
                "No computers found in the simulation model",
            ));
        }
        let start = world.clock;
        let deadline = self.workload.deadline_ticks.map(|d| start.saturating_add(d));
        for task in 0..self.workload.tasks {
            if task % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                let partial = self.collect(&world);
                return Err(EvaluatorFailure::with_partial("evaluation cancelled", partial));
            }
            world.submitted += 1;
            let Some((a, c, begin, finish)) =
                Self::earliest_core(&world, start, self.workload.task_instructions)
            else {
                continue;
            };
            if deadline.is_some_and(|d| finish > d) {
                continue;
            }
            let appliance = &mut world.appliances[a];
            appliance.cores_free_at[c] = finish;
            appliance.busy_ticks = appliance.busy_ticks.saturating_add(finish - begin);
            world.completed += 1;
            world.clock = world.clock.max(finish);
        }
        if let Some(d) = deadline {
            if world.completed < world.submitted {
                world.clock = world.clock.max(d);
            }
        }
        let metrics = self.collect(&world);
        debug!(
            "模拟结束：{} 台设备，完成 {}/{} 个任务，用时 {:.3} 秒",
            world.appliances.len(),
            metrics.completed_tasks,
            metrics.total_tasks,
            metrics.execution_time
        );
        Ok(metrics)
    }

    fn reset(&mut self) {
        let mut world = WORLD.lock().unwrap_or_else(PoisonError::into_inner);
        *world = World::EMPTY;
        // 状态已经清空，上一次评测中途崩溃也不影响之后的评测
        WORLD.clear_poison();
    }
}
