//! 遗传算法
//!
//! 每个槽位对应一个整数基因，取值范围是 [0, max_computers]。每一代先把整个种群评测完，
//! 再产生下一代：按 offspring_fraction 选出子代并施加变异、均值重组和均匀交叉，
//! 其余名额直接选出作为幸存者。搜索结束后，在会话中标记与全程最优基因型一致的所有记录。

use super::{SearchContext, Strategy};
use crate::candidate::{Config, Layout};
use crate::config::{GeneticSettings, GoalSettings};
use crate::interfaces::Message;
use crate::objectives::Direction;
use crate::operators::default::{MeanAlterer, Mutator, Selector, UniformCrossover};
use crate::operators::{clamp, recombine_population, Individual, Mutate, Select};
use crate::session::StrategyKind;
use crate::Error;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tracing::{debug, info, instrument};

pub struct GeneticSearch {
    layout: Arc<Layout>,
    population_size: usize,
    maximum_generations: usize,
    selector: Selector,
    mutator: Mutator,
    mean: MeanAlterer,
    crossover: UniformCrossover,
    offspring_fraction: f64,
    max_computers: u32,
    initial_population: Vec<Vec<u32>>,
    seed: Option<u64>,
}

impl GeneticSearch {
    pub fn new(layout: Arc<Layout>, goal: &GoalSettings, settings: GeneticSettings) -> Self {
        let selector = if goal.use_random {
            Selector::Random
        } else {
            Selector::Tournament(settings.tournament_size)
        };
        Self {
            layout,
            population_size: goal.population_size,
            maximum_generations: goal.maximum_generations,
            selector,
            mutator: Mutator {
                probability: settings.mutation_probability,
                max: settings.max_computers,
            },
            mean: MeanAlterer {
                probability: settings.mean_probability,
            },
            crossover: UniformCrossover {
                probability: settings.crossover_probability,
                swap_probability: settings.swap_probability,
            },
            offspring_fraction: settings.offspring_fraction,
            max_computers: settings.max_computers,
            initial_population: vec![],
            seed: None,
        }
    }

    /// 指定初始种群的一部分，其余个体随机生成；多出种群大小的部分被忽略
    pub fn with_initial_population(mut self, population: Vec<Vec<u32>>) -> Result<Self, Error> {
        for genes in &population {
            Config::new(self.layout.clone(), genes.clone())?.ensure_within(self.max_computers)?;
        }
        self.initial_population = population;
        Ok(self)
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    fn random_genotype(&self, rng: &mut StdRng) -> Vec<u32> {
        (0..self.layout.len())
            .map(|_| rng.random_range(0..=self.max_computers))
            .collect()
    }

    fn initial_genotypes(&self, rng: &mut StdRng) -> Vec<Vec<u32>> {
        let mut genotypes: Vec<Vec<u32>> = self
            .initial_population
            .iter()
            .take(self.population_size)
            .cloned()
            .collect();
        while genotypes.len() < self.population_size {
            genotypes.push(self.random_genotype(rng));
        }
        genotypes
    }

    /// 评测一整代；会话中途停止时返回 `None`
    fn evaluate_generation(
        &self,
        context: &SearchContext,
        generation: u64,
        genotypes: Vec<Vec<u32>>,
    ) -> Result<Option<Vec<Individual>>, Error> {
        let mut issued = Vec::with_capacity(genotypes.len());
        for genes in &genotypes {
            let config = Config::new(self.layout.clone(), genes.clone())?;
            issued.push(context.session.issue(config, generation)?);
        }
        let mut population = Vec::with_capacity(genotypes.len());
        for (genes, index) in genotypes.into_iter().zip(issued) {
            if context.stopped() {
                context.session.cancel_pending()?;
                return Ok(None);
            }
            let fitness = context.evaluate(index)?;
            population.push(Individual { genes, fitness });
        }
        Ok(Some(population))
    }

    fn breed(&self, population: &[Individual], direction: Direction, rng: &mut StdRng) -> Vec<Vec<u32>> {
        let size = population.len();
        let offspring_count = ((size as f64) * self.offspring_fraction).round() as usize;
        let offspring_count = offspring_count.min(size);
        let mut offspring: Vec<Vec<u32>> = self
            .selector
            .select(population, offspring_count, direction, rng)
            .into_iter()
            .map(|individual| individual.genes)
            .collect();
        for genes in offspring.iter_mut() {
            self.mutator.mutate(genes, rng);
        }
        recombine_population(&self.mean, &mut offspring, rng);
        recombine_population(&self.crossover, &mut offspring, rng);
        for genes in offspring.iter_mut() {
            clamp(genes, self.max_computers);
        }
        let survivors = self
            .selector
            .select(population, size - offspring_count, direction, rng)
            .into_iter()
            .map(|individual| individual.genes);
        offspring.extend(survivors);
        offspring
    }
}

impl Strategy for GeneticSearch {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Genetic
    }

    #[instrument(skip_all, fields(session = %context.session.id(), population = self.population_size))]
    fn run(&mut self, context: &SearchContext) -> Result<(), Error> {
        let direction = context.objective.direction();
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        let mut genotypes = self.initial_genotypes(&mut rng);
        let mut best: Option<Individual> = None;
        for generation in 1..=self.maximum_generations as u64 {
            if context.stopped() {
                break;
            }
            context.session.set_generation(generation)?;
            let Some(population) = self.evaluate_generation(context, generation, genotypes)? else {
                break;
            };
            let generation_best = population
                .iter()
                .reduce(|a, b| if direction.is_better(b.fitness, a.fitness) { b } else { a });
            if let Some(candidate) = generation_best {
                if best
                    .as_ref()
                    .is_none_or(|b| direction.is_better(candidate.fitness, b.fitness))
                {
                    best = Some(candidate.clone());
                }
            }
            let failed = population
                .iter()
                .filter(|i| i.fitness == direction.worst())
                .count();
            let best_fitness = best.as_ref().map_or(direction.worst(), |b| b.fitness);
            debug!("第 {generation} 代结束，最优适应度 {best_fitness}，失败 {failed} 个");
            context.interface.post(Message::GenerationFinished {
                session: context.session.id(),
                generation,
                best_fitness,
                failed,
            });
            genotypes = self.breed(&population, direction, &mut rng);
        }
        if let Some(best) = best {
            let tagged = context.session.tag_best(&best.genes)?;
            info!(
                "最优基因型 {:?}，适应度 {}，标记了 {} 条记录",
                best.genes, best.fitness, tagged
            );
        }
        Ok(())
    }
}
