//! 配置文件的定义
//!
//! 所有字段都可以省略，省略时使用下面各个 `Default` 实现中的取值。

use crate::Error;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::fs::read_to_string;
use std::path::Path;
use std::time::Duration;

/// 优化目标：时间、价格、能耗三者的加权和，以及遗传算法的规模
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GoalSettings {
    /// 用均匀随机选择代替锦标赛选择，作为对照
    pub use_random: bool,
    /// 为真时最小化适应度，否则最大化
    pub minimizing_cost: bool,
    pub population_size: usize,
    pub maximum_generations: usize,
    pub time_weight: f64,
    pub price_weight: f64,
    pub energy_weight: f64,
    /// 软约束：总价超过该值时对价格项施加惩罚
    pub maximum_price: Option<f64>,
}

impl Default for GoalSettings {
    fn default() -> Self {
        Self {
            use_random: false,
            minimizing_cost: false,
            population_size: 20,
            maximum_generations: 100,
            time_weight: 1.0,
            price_weight: 0.0,
            energy_weight: 0.0,
            maximum_price: None,
        }
    }
}

impl GoalSettings {
    pub fn validate(&self) -> Result<(), Error> {
        if self.population_size < 2 {
            return Err(Error::InvalidGoal(format!(
                "种群大小至少为 2，实际为 {}",
                self.population_size
            )));
        }
        if self.maximum_generations == 0 {
            return Err(Error::InvalidGoal("最大代数不能为 0".into()));
        }
        for (name, weight) in [
            ("timeWeight", self.time_weight),
            ("priceWeight", self.price_weight),
            ("energyWeight", self.energy_weight),
        ] {
            if !weight.is_finite() || weight < 0.0 {
                return Err(Error::InvalidGoal(format!("{name} 必须是非负有限数，实际为 {weight}")));
            }
        }
        if let Some(price) = self.maximum_price {
            if !price.is_finite() || price < 0.0 {
                return Err(Error::InvalidGoal(format!("maximumPrice 必须是非负有限数，实际为 {price}")));
            }
        }
        Ok(())
    }
}

/// 评测通道的参数
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationSettings {
    pub timeout_ms: u64,
    /// 超时后等待模拟器收尾并完成重置的时间，超过则认为评测器失去响应
    pub settle_timeout_ms: u64,
    pub cache_capacity: usize,
    pub cache_ttl_secs: u64,
}

impl Default for EvaluationSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 60_000,
            settle_timeout_ms: 30_000,
            cache_capacity: 10_000,
            cache_ttl_secs: 3_600,
        }
    }
}

impl EvaluationSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn settle_timeout(&self) -> Duration {
        Duration::from_millis(self.settle_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomSettings {
    pub iterations: usize,
    /// 每个槽位的实例数在 [0, max_count) 中均匀抽取
    pub max_count: u32,
}

impl Default for RandomSettings {
    fn default() -> Self {
        Self {
            iterations: 100,
            max_count: 4,
        }
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneticSettings {
    /// 每个基因的取值范围是 [0, max_computers]
    pub max_computers: u32,
    pub tournament_size: usize,
    pub mutation_probability: f64,
    pub mean_probability: f64,
    pub crossover_probability: f64,
    pub swap_probability: f64,
    pub offspring_fraction: f64,
    pub seed: Option<u64>,
}

impl Default for GeneticSettings {
    fn default() -> Self {
        Self {
            max_computers: 10,
            tournament_size: 3,
            mutation_probability: 0.1,
            mean_probability: 0.1,
            crossover_probability: 0.1,
            swap_probability: 0.1,
            offspring_fraction: 0.6,
            seed: None,
        }
    }
}

impl GeneticSettings {
    pub fn validate(&self) -> Result<(), Error> {
        if self.tournament_size == 0 {
            return Err("锦标赛规模不能为 0".into());
        }
        for (name, p) in [
            ("mutation_probability", self.mutation_probability),
            ("mean_probability", self.mean_probability),
            ("crossover_probability", self.crossover_probability),
            ("swap_probability", self.swap_probability),
            ("offspring_fraction", self.offspring_fraction),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(format!("{name} 必须在 [0, 1] 之间，实际为 {p}").into());
            }
        }
        Ok(())
    }
}

/// 内置模拟器的工作负载：一批相同的任务从源区域提交，分派到所有已部署的机器上
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadSettings {
    pub tasks: u32,
    /// 每个任务的指令数，机器每个核每 tick 处理 processingPerTick 条指令
    pub task_instructions: f64,
    /// 任务提交所在的区域，缺省时使用第一个槽位的区域
    pub source_region: Option<String>,
    /// 超过该时刻（tick）仍未完成的任务视为未完成
    pub deadline_ticks: Option<u64>,
    /// 每个核的空闲功率与满载功率，单位为瓦
    pub idle_power: f64,
    pub busy_power: f64,
}

impl Default for WorkloadSettings {
    fn default() -> Self {
        Self {
            tasks: 100,
            task_instructions: 60.0,
            source_region: None,
            deadline_ticks: None,
            idle_power: 70.0,
            busy_power: 150.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub port: u16,
    pub request_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: 8080,
            request_timeout_secs: 600,
        }
    }
}

/// 配置文件的全部内容
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub evaluation: EvaluationSettings,
    pub random: RandomSettings,
    pub genetic: GeneticSettings,
    pub workload: WorkloadSettings,
    pub server: ServerSettings,
}

impl Settings {
    /// 读取 YAML 配置文件；文件不存在时使用默认配置
    pub fn load(path: &Path) -> Result<Self, Error> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = read_to_string(path)?;
        let settings: Settings = serde_yaml::from_str(&content)?;
        settings.genetic.validate()?;
        Ok(settings)
    }
}
