//! 基础设施结构的输入格式
//!
//! 用户提供计算机型号、区域、区域间的连接，以及「哪种型号部署在哪个区域」的实例列表。
//! 每一个实例在优化时对应候选配置中的一个槽位，槽位的顺序就是实例在列表中的顺序。

use crate::candidate::{ComputerSpec, Layout, Region, Slot};
use crate::Error;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 计算机型号，一般对应云服务商提供的虚拟机规格
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputerSpecification {
    pub name: String,
    pub cores: u32,
    pub processing_per_tick: f64,
    pub memory: u64,
    #[serde(default)]
    pub price_per_tick: f64,
}

/// 区域，一般对应云服务商的数据中心
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionSpecification {
    pub name: String,
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
    /// 区域内部两台机器之间的延迟
    #[serde(default)]
    pub inter_region_latency: u32,
}

/// 部署在某个区域的某种型号
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputerInstance {
    pub computer_specification: String,
    pub region_specification: String,
}

/// 两个区域之间的延迟，不区分方向
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionConnection {
    pub from: String,
    pub to: String,
    pub latency: u32,
}

impl RegionConnection {
    pub fn connects(&self, a: &str, b: &str) -> bool {
        (self.from == a && self.to == b) || (self.from == b && self.to == a)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Structure {
    pub computer_types: Vec<ComputerSpecification>,
    pub regions: Vec<RegionSpecification>,
    pub instances: Vec<ComputerInstance>,
    pub region_connections: Vec<RegionConnection>,
    /// 没有显式连接的两个区域之间使用的延迟
    pub default_latency: u32,
}

impl Structure {
    /// 找出所有引用了不存在的型号或区域的实例
    pub fn invalid_instances(&self) -> Vec<&ComputerInstance> {
        self.instances
            .iter()
            .filter(|instance| {
                let type_missing = !self
                    .computer_types
                    .iter()
                    .any(|t| t.name == instance.computer_specification);
                let region_missing = !self
                    .regions
                    .iter()
                    .any(|r| r.name == instance.region_specification);
                type_missing || region_missing
            })
            .collect()
    }

    /// 区域 `from` 到区域 `to` 的延迟
    pub fn latency_between(&self, from: &RegionSpecification, to: &RegionSpecification) -> u32 {
        if from.name == to.name {
            return from.inter_region_latency;
        }
        self.region_connections
            .iter()
            .find(|c| c.connects(&from.name, &to.name))
            .map(|c| c.latency)
            .unwrap_or(self.default_latency)
    }

    /// 校验结构并展开为槽位布局，所有实例数初始为 0
    pub fn to_layout(&self) -> Result<Arc<Layout>, Error> {
        if self.instances.is_empty() {
            return Err(Error::EmptyStructure);
        }
        let invalid = self.invalid_instances();
        if !invalid.is_empty() {
            let instances = invalid
                .into_iter()
                .map(|i| format!("{}@{}", i.computer_specification, i.region_specification))
                .collect();
            return Err(Error::InvalidStructure { instances });
        }
        let types: FxHashMap<&str, &ComputerSpecification> = self
            .computer_types
            .iter()
            .map(|t| (t.name.as_str(), t))
            .collect();
        let regions: FxHashMap<&str, &RegionSpecification> =
            self.regions.iter().map(|r| (r.name.as_str(), r)).collect();

        let mut slots = Vec::with_capacity(self.instances.len());
        for instance in &self.instances {
            // 上面已经检查过，这里一定能找到
            let (Some(spec), Some(region)) = (
                types.get(instance.computer_specification.as_str()),
                regions.get(instance.region_specification.as_str()),
            ) else {
                continue;
            };
            let latencies = self
                .regions
                .iter()
                .map(|target| (target.name.clone(), self.latency_between(region, target)))
                .collect();
            slots.push(Slot {
                region: Region {
                    name: region.name.clone(),
                    latitude: region.latitude,
                    longitude: region.longitude,
                },
                computer: ComputerSpec {
                    name: spec.name.clone(),
                    cores: spec.cores,
                    processing_rate: spec.processing_per_tick,
                    memory: spec.memory,
                    price_per_tick: spec.price_per_tick,
                },
                latencies,
            });
        }
        Ok(Arc::new(Layout::new(slots, self.default_latency)))
    }
}
