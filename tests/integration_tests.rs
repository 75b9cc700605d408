use fogopt::candidate::Config;
use fogopt::config::{GeneticSettings, GoalSettings, RandomSettings, Settings};
use fogopt::evaluation::{Evaluation, EvaluationCache, EvaluationSerializer, TIMEOUT_REASON};
use fogopt::evaluators::synthetic::SyntheticEvaluator;
use fogopt::evaluators::{CancellationFlag, EvaluatorFailure, Metrics, ResettableEvaluator};
use fogopt::interfaces::Silent;
use fogopt::objectives::default::WeightedObjective;
use fogopt::optimizers::genetic::GeneticSearch;
use fogopt::optimizers::random_search::RandomSearch;
use fogopt::optimizers::Strategy;
use fogopt::session::{OptimizationService, RecordStatus, Session, StrategyKind};
use fogopt::structure::{
    ComputerInstance, ComputerSpecification, RegionConnection, RegionSpecification, Structure,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn structure(slots: usize) -> Structure {
    Structure {
        computer_types: vec![ComputerSpecification {
            name: "small".into(),
            cores: 2,
            processing_per_tick: 0.001,
            memory: 4_000_000_000,
            price_per_tick: 0.00002,
        }],
        regions: vec![
            RegionSpecification {
                name: "szeged".into(),
                latitude: 46.25,
                longitude: 20.15,
                inter_region_latency: 5,
            },
            RegionSpecification {
                name: "budapest".into(),
                latitude: 47.5,
                longitude: 19.04,
                inter_region_latency: 3,
            },
        ],
        instances: (0..slots)
            .map(|i| ComputerInstance {
                computer_specification: "small".into(),
                region_specification: if i % 2 == 0 { "szeged" } else { "budapest" }.into(),
            })
            .collect(),
        region_connections: vec![RegionConnection {
            from: "szeged".into(),
            to: "budapest".into(),
            latency: 20,
        }],
        default_latency: 100,
    }
}

/// 可以观察调用情况的桩评测器
///
/// 执行时间为第一个槽位的实例数乘以 `seconds_per_unit`，再加上 `base_seconds`；
/// 第一个槽位的实例数为 `slow_count` 时运行 200 毫秒，为 `failing_count` 时评测失败。
/// `dirty` 模拟必须在两次评测之间清空的进程级状态。
#[derive(Default)]
struct Recorder {
    seconds_per_unit: f64,
    base_seconds: f64,
    delay: Duration,
    slow_count: Option<u32>,
    failing_count: Option<u32>,
    dirty: bool,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    calls: Arc<AtomicUsize>,
    resets: Arc<AtomicUsize>,
}

impl ResettableEvaluator for Recorder {
    fn evaluate(
        &mut self,
        config: &Config,
        _cancel: &CancellationFlag,
    ) -> Result<Metrics, EvaluatorFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let leaked = self.dirty;
        self.dirty = true;
        let count = config.counts()[0];
        let delay = if self.slow_count == Some(count) {
            Duration::from_millis(200)
        } else {
            self.delay
        };
        thread::sleep(delay);
        self.active.fetch_sub(1, Ordering::SeqCst);
        if leaked {
            return Err(EvaluatorFailure::new("state leaked from previous run"));
        }
        if self.failing_count == Some(count) {
            return Err(EvaluatorFailure::new("No computers found in the simulation model"));
        }
        Ok(Metrics {
            total_cost: 1.0,
            total_energy: 1.0,
            execution_time: self.base_seconds + count as f64 * self.seconds_per_unit,
            total_tasks: 1,
            completed_tasks: 1,
        })
    }

    fn reset(&mut self) {
        self.dirty = false;
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}

fn evaluation<E: ResettableEvaluator + 'static>(evaluator: E, timeout: Duration) -> Evaluation {
    let cache = Arc::new(EvaluationCache::new(1_000, Duration::from_secs(3_600)));
    let serializer = EvaluationSerializer::spawn(evaluator, cache, Duration::from_secs(2)).unwrap();
    Evaluation::new(Arc::new(serializer), timeout)
}

fn minimizing_time() -> GoalSettings {
    GoalSettings {
        minimizing_cost: true,
        time_weight: 1.0,
        ..GoalSettings::default()
    }
}

fn start(
    strategy: Box<dyn Strategy>,
    goal: GoalSettings,
    evaluation: Evaluation,
) -> Arc<Session> {
    let session = Arc::new(Session::new(strategy.kind(), goal.clone()));
    session
        .start(
            strategy,
            evaluation,
            Arc::new(WeightedObjective::new(&goal)),
            Arc::new(Silent),
        )
        .unwrap();
    session
}

#[test]
fn random_search_records_every_iteration() {
    let recorder = Recorder {
        base_seconds: 10.0,
        ..Recorder::default()
    };
    let layout = structure(3).to_layout().unwrap();
    let strategy = RandomSearch::new(
        layout,
        RandomSettings {
            iterations: 5,
            max_count: 4,
        },
    )
    .with_seed(1);
    let session = start(
        Box::new(strategy),
        minimizing_time(),
        evaluation(recorder, Duration::from_secs(5)),
    );
    session.wait().unwrap();
    let snapshot = session.snapshot().unwrap();
    assert!(snapshot.is_done);
    assert_eq!(snapshot.records.len(), 5);
    assert_eq!(snapshot.statistics.finished, 5);
    for record in &snapshot.records {
        assert_eq!(record.status, RecordStatus::Finished);
        assert!(record.config.counts().iter().all(|&c| c < 4));
        let fitness = record.fitness.unwrap();
        assert!((fitness - 10.0 / 60.0).abs() < 1e-9);
    }
    assert!(snapshot.best_by_time.is_some());
}

#[test]
fn timeout_is_reported_and_the_evaluator_is_reset() {
    let resets = Arc::new(AtomicUsize::new(0));
    let recorder = Recorder {
        slow_count: Some(2),
        resets: resets.clone(),
        ..Recorder::default()
    };
    let layout = structure(1).to_layout().unwrap();
    let evaluation = evaluation(recorder, Duration::from_millis(100));
    let slow = Config::new(layout.clone(), vec![2]).unwrap();
    let result = evaluation.evaluate(&slow).unwrap();
    assert_eq!(result.failure.as_deref(), Some(TIMEOUT_REASON));
    assert!(result.is_failed());
    // 启动时一次，超时的评测之后一次
    assert_eq!(resets.load(Ordering::SeqCst), 2);
    let fast = Config::new(layout, vec![0]).unwrap();
    let result = evaluation.evaluate(&fast).unwrap();
    assert_eq!(result.failure, None);
    assert_eq!(resets.load(Ordering::SeqCst), 3);
}

#[test]
fn genetic_search_tags_the_best_genotype() {
    let recorder = Recorder {
        seconds_per_unit: 60.0,
        ..Recorder::default()
    };
    let layout = structure(1).to_layout().unwrap();
    let goal = GoalSettings {
        population_size: 4,
        maximum_generations: 2,
        ..minimizing_time()
    };
    let strategy = GeneticSearch::new(
        layout,
        &goal,
        GeneticSettings {
            max_computers: 3,
            ..GeneticSettings::default()
        },
    )
    .with_initial_population(vec![vec![0], vec![1], vec![2], vec![3]])
    .unwrap()
    .with_seed(11);
    let session = start(
        Box::new(strategy),
        goal,
        evaluation(recorder, Duration::from_secs(5)),
    );
    session.wait().unwrap();
    let snapshot = session.snapshot().unwrap();
    assert_eq!(snapshot.records.len(), 8);
    assert_eq!(snapshot.current_generation, 2);
    let first_generation: Vec<f64> = snapshot
        .records
        .iter()
        .filter(|r| r.generation == 1)
        .map(|r| r.fitness.unwrap())
        .collect();
    assert_eq!(first_generation, vec![0.0, 1.0, 2.0, 3.0]);
    let mut tagged = 0;
    for record in &snapshot.records {
        assert!(record.config.counts()[0] <= 3);
        assert_eq!(record.is_best_of_generation, record.config.counts() == [0]);
        if record.is_best_of_generation {
            tagged += 1;
        }
    }
    assert!(tagged >= 1);
}

#[test]
fn failed_genotypes_keep_the_population_size_and_never_win() {
    let recorder = Recorder {
        seconds_per_unit: 60.0,
        base_seconds: 60.0,
        failing_count: Some(0),
        ..Recorder::default()
    };
    let layout = structure(1).to_layout().unwrap();
    let goal = GoalSettings {
        population_size: 4,
        maximum_generations: 3,
        ..minimizing_time()
    };
    let strategy = GeneticSearch::new(
        layout,
        &goal,
        GeneticSettings {
            max_computers: 3,
            mutation_probability: 0.5,
            ..GeneticSettings::default()
        },
    )
    .with_initial_population(vec![vec![0], vec![0], vec![1], vec![3]])
    .unwrap()
    .with_seed(5);
    let session = start(
        Box::new(strategy),
        goal,
        evaluation(recorder, Duration::from_secs(5)),
    );
    session.wait().unwrap();
    let snapshot = session.snapshot().unwrap();
    for generation in 1..=3 {
        let count = snapshot
            .records
            .iter()
            .filter(|r| r.generation == generation)
            .count();
        assert_eq!(count, 4);
    }
    let mut failed = 0;
    for record in &snapshot.records {
        let result = record.result.as_ref().unwrap();
        if record.config.counts() == [0] {
            failed += 1;
            assert!(result.is_failed());
            assert_eq!(record.fitness, Some(f64::INFINITY));
            assert!(!record.is_best_of_generation);
        } else {
            assert!(!result.is_failed());
            assert!(record.fitness.unwrap().is_finite());
        }
    }
    assert!(failed >= 2);
    assert_eq!(snapshot.statistics.failed, failed);
    // 第一代中实例数为 1 的个体就是成功个体中的最优者
    let best: Vec<&[u32]> = snapshot
        .records
        .iter()
        .filter(|r| r.is_best_of_generation)
        .map(|r| r.config.counts())
        .collect();
    assert!(!best.is_empty());
    assert!(best.iter().all(|counts| *counts == [1]));
}

#[test]
fn evaluations_never_overlap() {
    let peak = Arc::new(AtomicUsize::new(0));
    let calls = Arc::new(AtomicUsize::new(0));
    let resets = Arc::new(AtomicUsize::new(0));
    let recorder = Recorder {
        delay: Duration::from_millis(10),
        peak: peak.clone(),
        calls: calls.clone(),
        resets: resets.clone(),
        ..Recorder::default()
    };
    let layout = structure(1).to_layout().unwrap();
    let evaluation = evaluation(recorder, Duration::from_secs(5));
    let handles: Vec<_> = (0..4u32)
        .map(|t| {
            let evaluation = evaluation.clone();
            let layout = layout.clone();
            thread::spawn(move || {
                for k in 0..3 {
                    let config = Config::new(layout.clone(), vec![t * 10 + k]).unwrap();
                    let result = evaluation.evaluate(&config).unwrap();
                    assert_eq!(result.failure, None);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 12);
    assert_eq!(resets.load(Ordering::SeqCst), 13);
    assert_eq!(evaluation.cache().len(), 12);
}

#[test]
fn stopping_cancels_pending_records() {
    let recorder = Recorder {
        delay: Duration::from_millis(30),
        ..Recorder::default()
    };
    let layout = structure(4).to_layout().unwrap();
    let strategy = RandomSearch::new(
        layout,
        RandomSettings {
            iterations: 50,
            max_count: 4,
        },
    )
    .with_seed(3);
    let session = start(
        Box::new(strategy),
        minimizing_time(),
        evaluation(recorder, Duration::from_secs(5)),
    );
    while session.snapshot().unwrap().statistics.finished == 0 {
        thread::sleep(Duration::from_millis(5));
    }
    session.stop();
    session.wait().unwrap();
    let snapshot = session.snapshot().unwrap();
    assert!(snapshot.is_done);
    assert_eq!(snapshot.records.len(), 50);
    assert!(snapshot.statistics.finished >= 1);
    assert!(snapshot.statistics.cancelled > 0);
    assert_eq!(
        snapshot.statistics.finished + snapshot.statistics.cancelled,
        50
    );
    assert!(snapshot
        .records
        .iter()
        .all(|r| r.status.is_terminal()));
}

#[test]
fn service_runs_the_synthetic_simulator() {
    let settings = Settings {
        random: RandomSettings {
            iterations: 6,
            max_count: 3,
        },
        ..Settings::default()
    };
    let cache = Arc::new(EvaluationCache::new(100, Duration::from_secs(60)));
    let serializer = EvaluationSerializer::spawn(
        SyntheticEvaluator::new(settings.workload.clone()),
        cache,
        Duration::from_secs(5),
    )
    .unwrap();
    let evaluation = Evaluation::new(Arc::new(serializer), Duration::from_secs(30));
    let service = OptimizationService::new(evaluation, &settings, Arc::new(Silent));
    let id = service.start_random(&structure(3)).unwrap();
    let session = service.session(id).unwrap();
    session.wait().unwrap();
    let snapshot = service.get_session(id).unwrap();
    assert_eq!(snapshot.kind, StrategyKind::Random);
    assert_eq!(snapshot.records.len(), 6);
    for record in &snapshot.records {
        let result = record.result.as_ref().unwrap();
        if record.config.total_instances() == 0 {
            assert!(result.is_failed());
            assert_eq!(record.fitness, Some(f64::INFINITY));
        } else {
            assert_eq!(result.failure, None);
            assert_eq!(result.completed_tasks, 100);
            assert!(result.execution_time > 0.0);
        }
    }
    assert_eq!(service.list_sessions().unwrap().len(), 1);
    assert!(service.get_session_since(id, snapshot.last_updated).unwrap().is_none());
}

#[test]
fn settings_file_overrides_defaults() {
    let path = std::env::temp_dir().join(format!("fogopt-settings-{}.yaml", std::process::id()));
    std::fs::write(
        &path,
        "evaluation:\n  timeout_ms: 500\nrandom:\n  iterations: 7\ngenetic:\n  max_computers: 5\n",
    )
    .unwrap();
    let settings = Settings::load(&path);
    std::fs::remove_file(&path).unwrap();
    let settings = settings.unwrap();
    assert_eq!(settings.evaluation.timeout(), Duration::from_millis(500));
    assert_eq!(settings.genetic.max_computers, 5);
    assert_eq!(settings.random.iterations, 7);
    assert_eq!(settings.random.max_count, 4);
    assert_eq!(settings.server.port, 8080);
    let missing = Settings::load(std::path::Path::new("does-not-exist.yaml")).unwrap();
    assert_eq!(missing.random.iterations, 100);
}
