//! 目标函数接口，以及默认目标函数的实现
//!
//! 目标函数把一次评测结果映射为一个标量适应度。失败的评测总是得到当前优化方向上最差的值，
//! 因此永远不会被选为最优。

use crate::evaluation::EvaluationResult;
use serde::Serialize;
use std::cmp::Ordering;

pub mod default;

/// 优化方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Minimize,
    Maximize,
}

impl Direction {
    pub fn from_minimizing(minimizing: bool) -> Self {
        if minimizing {
            Self::Minimize
        } else {
            Self::Maximize
        }
    }

    /// 这个方向上最差的适应度
    pub fn worst(&self) -> f64 {
        match self {
            Self::Minimize => f64::INFINITY,
            Self::Maximize => f64::NEG_INFINITY,
        }
    }

    /// `a` 是否严格优于 `b`
    pub fn is_better(&self, a: f64, b: f64) -> bool {
        self.compare(a, b) == Ordering::Greater
    }

    /// 按优劣比较，越好越大
    pub fn compare(&self, a: f64, b: f64) -> Ordering {
        match self {
            Self::Minimize => b.total_cmp(&a),
            Self::Maximize => a.total_cmp(&b),
        }
    }
}

pub trait Objective: Send + Sync {
    fn direction(&self) -> Direction;

    fn score(&self, result: &EvaluationResult) -> f64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worst_is_worse_than_any_finite_value() {
        for direction in [Direction::Minimize, Direction::Maximize] {
            for value in [-1e300, -1.0, 0.0, 1.0, 1e300] {
                assert!(direction.is_better(value, direction.worst()));
                assert!(!direction.is_better(direction.worst(), value));
            }
        }
    }

    #[test]
    fn direction_orders_values() {
        assert!(Direction::Minimize.is_better(1.0, 2.0));
        assert!(Direction::Maximize.is_better(2.0, 1.0));
        assert!(!Direction::Minimize.is_better(1.0, 1.0));
        assert_eq!(Direction::from_minimizing(true), Direction::Minimize);
    }
}
