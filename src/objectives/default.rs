use super::{Direction, Objective};
use crate::config::GoalSettings;
use crate::evaluation::EvaluationResult;

/// 价格超过上限时，价格项乘以或除以这个系数
pub const PRICE_PENALTY: f64 = 100.0;

/// 时间（分钟）、价格、能耗的加权和
#[derive(Debug, Clone)]
pub struct WeightedObjective {
    direction: Direction,
    time_weight: f64,
    price_weight: f64,
    energy_weight: f64,
    maximum_price: Option<f64>,
}

impl WeightedObjective {
    pub fn new(goal: &GoalSettings) -> Self {
        Self {
            direction: Direction::from_minimizing(goal.minimizing_cost),
            time_weight: goal.time_weight,
            price_weight: goal.price_weight,
            energy_weight: goal.energy_weight,
            maximum_price: goal.maximum_price,
        }
    }
}

impl Objective for WeightedObjective {
    fn direction(&self) -> Direction {
        self.direction
    }

    fn score(&self, result: &EvaluationResult) -> f64 {
        if result.is_failed() {
            return self.direction.worst();
        }
        let mut price = result.total_cost;
        if self.maximum_price.is_some_and(|max| price > max) {
            price = match self.direction {
                Direction::Minimize => price * PRICE_PENALTY,
                Direction::Maximize => price / PRICE_PENALTY,
            };
        }
        result.execution_minutes() * self.time_weight
            + price * self.price_weight
            + result.total_energy * self.energy_weight
    }
}
