use crate::config::{GoalSettings, Settings};
use crate::interfaces::{Interface, Message};
use crate::session::{Record, RecordStatus, SessionSnapshot, Statistics, StrategyKind};
use crate::structure::Structure;
use crate::Error;
use chrono::Local;
use clap::{Parser, Subcommand};
use csv::WriterBuilder;
use itertools::Itertools;
use serde::Serialize;
use std::fs::{create_dir_all, read_to_string, write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// 命令行参数的定义
#[derive(Parser, Clone)]
#[command(name = "fogopt")]
#[command(author, version, about, long_about)]
#[command(propagate_version = true)]
pub struct CommandLineArgs {
    #[command(subcommand)]
    pub command: Command,
    /// 配置文件，默认为 fogopt.yaml，不存在时使用默认配置
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

impl CommandLineArgs {
    pub fn settings(&self) -> Result<Settings, Error> {
        let path = self.config.clone().unwrap_or(PathBuf::from("fogopt.yaml"));
        Settings::load(&path)
    }
}

/// 命令行中所有可用的子命令
#[derive(Subcommand, Clone)]
pub enum Command {
    /// 启动 HTTP 服务，通过接口创建和查询会话
    Serve {
        /// 监听端口，默认使用配置文件中的端口
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// 对结构文件中的实例进行随机搜索
    Random {
        /// 结构文件（YAML 或 JSON）
        structure: PathBuf,
        /// 评测次数，默认使用配置文件中的次数
        #[arg(short, long)]
        iterations: Option<usize>,
    },
    /// 使用遗传算法优化结构文件中每个实例的数量
    Genetic {
        /// 结构文件（YAML 或 JSON）
        structure: PathBuf,
        /// 优化目标文件，缺省时以最小化执行时间为目标
        #[arg(short, long, value_name = "FILE")]
        goal: Option<PathBuf>,
    },
}

/// 通过命令行来使用 fogopt 的入口，实现了界面特征
pub struct CommandLine {
    pub output_dir: PathBuf,
}

#[derive(Serialize)]
struct RecordRow {
    id: Uuid,
    generation: u64,
    status: RecordStatus,
    counts: String,
    fitness: Option<f64>,
    execution_time: Option<f64>,
    total_cost: Option<f64>,
    total_energy: Option<f64>,
    completed_tasks: Option<u64>,
    total_tasks: Option<u64>,
    failure: Option<String>,
    best: bool,
}

impl From<&Record> for RecordRow {
    fn from(record: &Record) -> Self {
        let result = record.result.as_ref();
        Self {
            id: record.id,
            generation: record.generation,
            status: record.status,
            counts: record.config.counts().iter().join(","),
            fitness: record.fitness,
            execution_time: result.map(|r| r.execution_time),
            total_cost: result.map(|r| r.total_cost),
            total_energy: result.map(|r| r.total_energy),
            completed_tasks: result.map(|r| r.completed_tasks),
            total_tasks: result.map(|r| r.total_tasks),
            failure: result.and_then(|r| r.failure.clone()),
            best: record.is_best_of_generation,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Summary<'a> {
    id: Uuid,
    kind: StrategyKind,
    goal_settings: &'a GoalSettings,
    statistics: &'a Statistics,
    best_by_time: Option<&'a Record>,
    best_by_cost: Option<&'a Record>,
    best_by_energy: Option<&'a Record>,
    best_of_generation: Vec<&'a Record>,
}

impl CommandLine {
    pub fn new(maybe_output_dir: Option<PathBuf>) -> Result<Self, Error> {
        let output_dir = maybe_output_dir.unwrap_or_else(|| {
            let time = Local::now().format("%m-%d+%H_%M_%S").to_string();
            PathBuf::from(format!("output-{time}"))
        });
        create_dir_all(&output_dir)?;
        Ok(Self { output_dir })
    }

    pub fn read_structure(path: &Path) -> Result<Structure, Error> {
        let content = read_to_string(path)?;
        Ok(serde_yaml::from_str(&content)?)
    }

    /// 读取优化目标；命令行默认最小化
    pub fn read_goal(path: Option<&Path>) -> Result<GoalSettings, Error> {
        match path {
            Some(path) => {
                let content = read_to_string(path)?;
                Ok(serde_yaml::from_str(&content)?)
            }
            None => Ok(GoalSettings {
                minimizing_cost: true,
                ..GoalSettings::default()
            }),
        }
    }

    /// 把所有记录写成制表符分隔的表格
    pub fn write_records(&self, records: &[Record]) -> Result<PathBuf, Error> {
        let path = self.output_dir.join("records.tsv");
        let mut writer = WriterBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .from_path(&path)?;
        for record in records {
            writer.serialize(RecordRow::from(record))?;
        }
        writer.flush()?;
        println!("共 {} 条记录，保存在 {} 中", records.len(), path.display());
        Ok(path)
    }

    pub fn write_summary(&self, snapshot: &SessionSnapshot) -> Result<PathBuf, Error> {
        let path = self.output_dir.join("summary.yaml");
        let summary = Summary {
            id: snapshot.id,
            kind: snapshot.kind,
            goal_settings: &snapshot.goal_settings,
            statistics: &snapshot.statistics,
            best_by_time: snapshot.best_by_time.as_ref(),
            best_by_cost: snapshot.best_by_cost.as_ref(),
            best_by_energy: snapshot.best_by_energy.as_ref(),
            best_of_generation: snapshot
                .records
                .iter()
                .filter(|r| r.is_best_of_generation)
                .collect(),
        };
        write(&path, serde_yaml::to_string(&summary)?)?;
        println!("汇总保存在 {} 中", path.display());
        Ok(path)
    }
}

impl Interface for CommandLine {
    fn post(&self, message: Message) {
        match message {
            Message::SessionStarted { session, kind } => {
                println!("会话 {session} 开始，搜索方法为 {kind:?}");
            }
            Message::RecordFinished {
                generation,
                fitness,
                failure,
                ..
            } => match failure {
                Some(reason) => println!("第 {generation} 代的一个候选配置评测失败：{reason}"),
                None => println!("第 {generation} 代的一个候选配置评测完成，适应度为 {fitness:.6}"),
            },
            Message::GenerationFinished {
                generation,
                best_fitness,
                failed,
                ..
            } => {
                println!("第 {generation} 代结束，目前最优适应度为 {best_fitness:.6}，本代失败 {failed} 个");
            }
            Message::SessionFinished {
                session,
                records,
                stopped,
            } => {
                let how = if stopped { "已停止" } else { "已完成" };
                println!("会话 {session} {how}，共 {records} 条记录");
            }
        }
    }
}
