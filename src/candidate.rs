//! 候选配置：每个槽位部署多少台机器
//!
//! [`Layout`] 是整个搜索过程中不变的静态部分（型号、区域、延迟、价格），
//! [`Config`] 在布局之上给出每个槽位的实例数。槽位的顺序在一次搜索中保持不变，
//! 遗传算法的基因按位置对应槽位。

use crate::Error;
use rustc_hash::FxHasher;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComputerSpec {
    pub name: String,
    pub cores: u32,
    pub processing_rate: f64,
    pub memory: u64,
    pub price_per_tick: f64,
}

/// 一个槽位：部署在某区域的某种型号
#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    pub region: Region,
    pub computer: ComputerSpec,
    /// 到每个区域的延迟
    pub latencies: BTreeMap<String, u32>,
}

impl Slot {
    pub fn latency_to(&self, region: &str) -> Option<u32> {
        self.latencies.get(region).copied()
    }
}

/// 槽位布局
#[derive(Debug)]
pub struct Layout {
    slots: Vec<Slot>,
    default_latency: u32,
    identity: Vec<(Arc<str>, Arc<str>)>,
    digest: u64,
}

impl Layout {
    pub fn new(slots: Vec<Slot>, default_latency: u32) -> Self {
        let identity = slots
            .iter()
            .map(|s| (Arc::from(s.region.name.as_str()), Arc::from(s.computer.name.as_str())))
            .collect();
        let digest = Self::digest(&slots, default_latency);
        Self {
            slots,
            default_latency,
            identity,
            digest,
        }
    }

    /// 静态数据的摘要，浮点数按位参与哈希，相同的布局总是得到相同的摘要
    fn digest(slots: &[Slot], default_latency: u32) -> u64 {
        let mut hasher = FxHasher::default();
        default_latency.hash(&mut hasher);
        for slot in slots {
            slot.region.name.hash(&mut hasher);
            slot.region.latitude.to_bits().hash(&mut hasher);
            slot.region.longitude.to_bits().hash(&mut hasher);
            slot.computer.name.hash(&mut hasher);
            slot.computer.cores.hash(&mut hasher);
            slot.computer.processing_rate.to_bits().hash(&mut hasher);
            slot.computer.memory.hash(&mut hasher);
            slot.computer.price_per_tick.to_bits().hash(&mut hasher);
            slot.latencies.hash(&mut hasher);
        }
        hasher.finish()
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn default_latency(&self) -> u32 {
        self.default_latency
    }

    /// 槽位 `slot` 到区域 `region` 的延迟，未知区域使用默认延迟
    pub fn latency(&self, slot: usize, region: &str) -> u32 {
        self.slots
            .get(slot)
            .and_then(|s| s.latency_to(region))
            .unwrap_or(self.default_latency)
    }
}

/// 缓存键：只由布局摘要、槽位身份和实例数构成
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    layout: u64,
    slots: Vec<(Arc<str>, Arc<str>, u32)>,
}

/// 一个候选配置，不可变；派生新配置时复制实例数并替换需要修改的部分
#[derive(Debug, Clone)]
pub struct Config {
    layout: Arc<Layout>,
    counts: Vec<u32>,
}

impl PartialEq for Config {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint() == other.fingerprint()
    }
}

impl Config {
    pub fn new(layout: Arc<Layout>, counts: Vec<u32>) -> Result<Self, Error> {
        if counts.len() != layout.len() {
            return Err(Error::SlotCountMismatch {
                expected: layout.len(),
                actual: counts.len(),
            });
        }
        Ok(Self { layout, counts })
    }

    /// 所有槽位实例数为 0 的配置
    pub fn empty(layout: Arc<Layout>) -> Self {
        let counts = vec![0; layout.len()];
        Self { layout, counts }
    }

    pub fn with_counts(&self, counts: Vec<u32>) -> Result<Self, Error> {
        Self::new(self.layout.clone(), counts)
    }

    pub fn with_count(&self, slot: usize, count: u32) -> Result<Self, Error> {
        if slot >= self.counts.len() {
            return Err(Error::SlotCountMismatch {
                expected: self.counts.len(),
                actual: slot + 1,
            });
        }
        let mut counts = self.counts.clone();
        counts[slot] = count;
        Ok(Self {
            layout: self.layout.clone(),
            counts,
        })
    }

    /// 检查每个槽位的实例数不超过 `max`
    pub fn ensure_within(&self, max: u32) -> Result<(), Error> {
        match self.counts.iter().position(|&c| c > max) {
            Some(slot) => Err(Error::CountOutOfRange {
                slot,
                count: self.counts[slot],
                max,
            }),
            None => Ok(()),
        }
    }

    pub fn layout(&self) -> &Arc<Layout> {
        &self.layout
    }

    pub fn counts(&self) -> &[u32] {
        &self.counts
    }

    pub fn total_instances(&self) -> u64 {
        self.counts.iter().map(|&c| c as u64).sum()
    }

    /// 依次给出每个槽位及其实例数
    pub fn slots(&self) -> impl Iterator<Item = (&Slot, u32)> {
        self.layout.slots().iter().zip(self.counts.iter().copied())
    }

    pub fn fingerprint(&self) -> Fingerprint {
        let slots = self
            .layout
            .identity
            .iter()
            .zip(&self.counts)
            .map(|((region, computer), &count)| (region.clone(), computer.clone(), count))
            .collect();
        Fingerprint {
            layout: self.layout.digest,
            slots,
        }
    }
}

struct SlotView<'a> {
    slot: &'a Slot,
    count: u32,
}

impl Serialize for SlotView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Slot", 4)?;
        state.serialize_field("region", &self.slot.region.name)?;
        state.serialize_field("computerType", &self.slot.computer.name)?;
        state.serialize_field("cores", &self.slot.computer.cores)?;
        state.serialize_field("count", &self.count)?;
        state.end()
    }
}

impl Serialize for Config {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.slots().map(|(slot, count)| SlotView { slot, count }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::tests::sample_structure;

    #[test]
    fn identical_configs_share_a_fingerprint() {
        let layout = sample_structure().to_layout().unwrap();
        let a = Config::new(layout.clone(), vec![1, 2, 3]).unwrap();
        let b = Config::empty(layout.clone())
            .with_count(0, 1)
            .and_then(|c| c.with_count(1, 2))
            .and_then(|c| c.with_count(2, 3))
            .unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        // 独立构造的相同布局也得到相同的指纹
        let other_layout = sample_structure().to_layout().unwrap();
        let c = Config::new(other_layout, vec![1, 2, 3]).unwrap();
        assert_eq!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn any_count_change_changes_the_fingerprint() {
        let layout = sample_structure().to_layout().unwrap();
        let base = Config::new(layout, vec![1, 2, 3]).unwrap();
        for slot in 0..3 {
            let changed = base.with_count(slot, base.counts()[slot] + 1).unwrap();
            assert_ne!(base.fingerprint(), changed.fingerprint());
        }
        let swapped = base.with_counts(vec![3, 2, 1]).unwrap();
        assert_ne!(base.fingerprint(), swapped.fingerprint());
    }

    #[test]
    fn derive_with_override_leaves_the_template_untouched() {
        let layout = sample_structure().to_layout().unwrap();
        let template = Config::empty(layout);
        let derived = template.with_count(1, 7).unwrap();
        assert_eq!(template.counts(), &[0, 0, 0]);
        assert_eq!(derived.counts(), &[0, 7, 0]);
        assert!(template.with_count(3, 1).is_err());
        assert!(template.with_counts(vec![1]).is_err());
    }

    #[test]
    fn bounds_are_checked_per_slot() {
        let layout = sample_structure().to_layout().unwrap();
        let config = Config::new(layout, vec![0, 11, 3]).unwrap();
        assert!(matches!(
            config.ensure_within(10),
            Err(Error::CountOutOfRange { slot: 1, count: 11, max: 10 })
        ));
        assert!(config.ensure_within(11).is_ok());
    }

    #[test]
    fn config_serializes_as_slot_list() {
        let layout = sample_structure().to_layout().unwrap();
        let config = Config::new(layout, vec![2, 0, 1]).unwrap();
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json[0]["region"], "szeged");
        assert_eq!(json[0]["computerType"], "small");
        assert_eq!(json[0]["count"], 2);
        assert_eq!(json.as_array().unwrap().len(), 3);
    }
}
