//! 随机搜索
//!
//! 会话开始时一次性生成全部候选配置（每个槽位的实例数在 [0, K) 中独立均匀抽取），
//! 然后按生成顺序逐个评测。作为基线，也用来检验遗传算法。

use super::{SearchContext, Strategy};
use crate::candidate::{Config, Layout};
use crate::config::RandomSettings;
use crate::session::StrategyKind;
use crate::Error;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tracing::{info, instrument};

pub struct RandomSearch {
    layout: Arc<Layout>,
    iterations: usize,
    max_count: u32,
    seed: Option<u64>,
}

impl RandomSearch {
    pub fn new(layout: Arc<Layout>, settings: RandomSettings) -> Self {
        Self {
            layout,
            iterations: settings.iterations,
            max_count: settings.max_count.max(1),
            seed: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    fn draw(&self, rng: &mut StdRng) -> Result<Config, Error> {
        let counts = (0..self.layout.len())
            .map(|_| rng.random_range(0..self.max_count))
            .collect();
        Config::new(self.layout.clone(), counts)
    }
}

impl Strategy for RandomSearch {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Random
    }

    #[instrument(skip_all, fields(session = %context.session.id(), iterations = self.iterations))]
    fn run(&mut self, context: &SearchContext) -> Result<(), Error> {
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        let mut issued = Vec::with_capacity(self.iterations);
        for _ in 0..self.iterations {
            issued.push(context.session.issue(self.draw(&mut rng)?, 0)?);
        }
        info!("已生成 {} 个候选配置", issued.len());
        for index in issued {
            if context.stopped() {
                break;
            }
            context.evaluate(index)?;
        }
        let cancelled = context.session.cancel_pending()?;
        if cancelled > 0 {
            info!("会话停止，{} 个候选配置未评测", cancelled);
        }
        Ok(())
    }
}
