//! 算子接口，以及默认算子的实现（选择、变异、重组）
//!
//! 基因型是每个槽位一个整数基因，取值范围是 [0, max]。

use crate::objectives::Direction;
use rand::rngs::StdRng;
use rand::Rng;

pub mod default;

/// 种群中的一个个体
#[derive(Debug, Clone, PartialEq)]
pub struct Individual {
    pub genes: Vec<u32>,
    pub fitness: f64,
}

pub trait Select {
    /// 从种群中选出 `count` 个个体，允许重复
    fn select(
        &self,
        population: &[Individual],
        count: usize,
        direction: Direction,
        rng: &mut StdRng,
    ) -> Vec<Individual>;
}

pub trait Mutate {
    /// 原地扰动一个基因型，返回发生变化的基因数
    fn mutate(&self, genes: &mut [u32], rng: &mut StdRng) -> usize;
}

pub trait Recombine {
    /// 每个个体参与重组的概率
    fn probability(&self) -> f64;

    /// 重组一对基因型，第一个是被选中的个体，第二个是随机挑选的伙伴
    fn recombine(&self, first: &mut [u32], second: &mut [u32], rng: &mut StdRng);
}

/// 对整个种群执行一轮重组，返回参与重组的个体数
pub fn recombine_population<R: Recombine + ?Sized>(
    operator: &R,
    population: &mut [Vec<u32>],
    rng: &mut StdRng,
) -> usize {
    let len = population.len();
    if len < 2 {
        return 0;
    }
    let mut altered = 0;
    for i in 0..len {
        if !rng.random_bool(operator.probability()) {
            continue;
        }
        let mut j = rng.random_range(0..len - 1);
        if j >= i {
            j += 1;
        }
        let (first, second) = if i < j {
            let (lo, hi) = population.split_at_mut(j);
            (&mut lo[i], &mut hi[0])
        } else {
            let (lo, hi) = population.split_at_mut(i);
            (&mut hi[0], &mut lo[j])
        };
        operator.recombine(first, second, rng);
        altered += 1;
    }
    altered
}

/// 把每个基因截断到 [0, max]
pub fn clamp(genes: &mut [u32], max: u32) {
    for gene in genes {
        *gene = (*gene).min(max);
    }
}
