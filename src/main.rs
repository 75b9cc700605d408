//! fogopt: 雾计算基础设施结构优化［命令行版］
//!
//! 用户提供结构文件（计算机型号、区域、实例列表），本程序用随机搜索或遗传算法决定每个实例部署多少台机器，
//! 结果保存在以时间戳命名的输出目录中；也可以作为 HTTP 服务运行，通过接口创建和查询会话。

use fogopt::config::{GoalSettings, Settings};
use fogopt::evaluation::{Evaluation, EvaluationCache, EvaluationSerializer};
use fogopt::evaluators::synthetic::SyntheticEvaluator;
use fogopt::interfaces::command_line::{Command, CommandLine, CommandLineArgs};
use fogopt::server::{start_server, Broadcaster};
use fogopt::session::{OptimizationService, StrategyKind};
use fogopt::{init_tracing, Error, Interface};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

fn build_evaluation(settings: &Settings) -> Result<Evaluation, Error> {
    let evaluation = settings.evaluation;
    let cache = Arc::new(EvaluationCache::new(
        evaluation.cache_capacity,
        evaluation.cache_ttl(),
    ));
    let evaluator = SyntheticEvaluator::new(settings.workload.clone());
    let serializer = EvaluationSerializer::spawn(evaluator, cache, evaluation.settle_timeout())?;
    Ok(Evaluation::new(Arc::new(serializer), evaluation.timeout()))
}

fn run_session(
    settings: &Settings,
    kind: StrategyKind,
    goal: GoalSettings,
    structure: &Path,
) -> Result<(), Error> {
    let structure = CommandLine::read_structure(structure)?;
    let cli = Arc::new(CommandLine::new(None)?);
    let interface: Arc<dyn Interface> = cli.clone();
    let service = OptimizationService::new(build_evaluation(settings)?, settings, interface);
    let id = service.create_session(kind, goal, &structure)?;
    let session = service.session(id)?;
    session.wait()?;
    let snapshot = session.snapshot()?;
    cli.write_records(&snapshot.records)?;
    cli.write_summary(&snapshot)?;
    Ok(())
}

fn main() -> Result<(), Error> {
    init_tracing();
    let args = CommandLineArgs::parse();
    let mut settings = args.settings()?;
    match args.command {
        Command::Serve { port } => {
            if let Some(port) = port {
                settings.server.port = port;
            }
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(async {
                let (broadcaster, messages) = Broadcaster::channel(256);
                let service = Arc::new(OptimizationService::new(
                    build_evaluation(&settings)?,
                    &settings,
                    Arc::new(broadcaster),
                ));
                start_server(service, messages, settings.server).await
            })?;
        }
        Command::Random {
            structure,
            iterations,
        } => {
            if let Some(iterations) = iterations {
                settings.random.iterations = iterations;
            }
            info!("随机搜索，共 {} 次评测", settings.random.iterations);
            let goal = CommandLine::read_goal(None)?;
            run_session(&settings, StrategyKind::Random, goal, &structure)?;
        }
        Command::Genetic { structure, goal } => {
            let goal = CommandLine::read_goal(goal.as_deref())?;
            info!(
                "遗传算法，种群大小 {}，最多 {} 代",
                goal.population_size, goal.maximum_generations
            );
            run_session(&settings, StrategyKind::Genetic, goal, &structure)?;
        }
    }
    Ok(())
}
