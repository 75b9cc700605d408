use super::{Individual, Mutate, Recombine, Select};
use crate::objectives::Direction;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::Rng;

/// 选择算子：锦标赛选择，或者作为对照的均匀随机选择
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selector {
    Tournament(usize),
    Random,
}

impl Select for Selector {
    fn select(
        &self,
        population: &[Individual],
        count: usize,
        direction: Direction,
        rng: &mut StdRng,
    ) -> Vec<Individual> {
        if population.is_empty() {
            return vec![];
        }
        (0..count)
            .filter_map(|_| match self {
                Selector::Random => population.choose(rng).cloned(),
                Selector::Tournament(size) => (0..(*size).max(1))
                    .filter_map(|_| population.choose(rng))
                    .reduce(|best, candidate| {
                        if direction.is_better(candidate.fitness, best.fitness) {
                            candidate
                        } else {
                            best
                        }
                    })
                    .cloned(),
            })
            .collect()
    }
}

/// 以概率 `probability` 把每个基因替换为 [0, max] 中的随机值
#[derive(Debug, Clone, Copy)]
pub struct Mutator {
    pub probability: f64,
    pub max: u32,
}

impl Mutate for Mutator {
    fn mutate(&self, genes: &mut [u32], rng: &mut StdRng) -> usize {
        let mut changed = 0;
        for gene in genes.iter_mut() {
            if rng.random_bool(self.probability) {
                let value = rng.random_range(0..=self.max);
                if value != *gene {
                    changed += 1;
                }
                *gene = value;
            }
        }
        changed
    }
}

/// 把第一个基因型的每个基因替换为两者的平均值
#[derive(Debug, Clone, Copy)]
pub struct MeanAlterer {
    pub probability: f64,
}

impl Recombine for MeanAlterer {
    fn probability(&self) -> f64 {
        self.probability
    }

    fn recombine(&self, first: &mut [u32], second: &mut [u32], _rng: &mut StdRng) {
        for (a, b) in first.iter_mut().zip(second.iter()) {
            *a = ((*a as u64 + *b as u64) / 2) as u32;
        }
    }
}

/// 均匀交叉：每个位置以概率 `swap_probability` 交换两个基因型的基因
#[derive(Debug, Clone, Copy)]
pub struct UniformCrossover {
    pub probability: f64,
    pub swap_probability: f64,
}

impl Recombine for UniformCrossover {
    fn probability(&self) -> f64 {
        self.probability
    }

    fn recombine(&self, first: &mut [u32], second: &mut [u32], rng: &mut StdRng) {
        for (a, b) in first.iter_mut().zip(second.iter_mut()) {
            if rng.random_bool(self.swap_probability) {
                std::mem::swap(a, b);
            }
        }
    }
}
