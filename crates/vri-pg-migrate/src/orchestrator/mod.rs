//! Migration orchestrator - main workflow coordinator.
//!
//! Owns the ordered unit list and drives the run through its phases:
//! `Idle -> Preparing -> Cleaning -> Running(unit) -> Completed | Failed`.
//! Units run strictly one after another and the run halts at the first
//! failing unit.

use crate::catalog;
use crate::config::Config;
use crate::error::{MigrateError, Result};
use crate::loader::LoadMode;
use crate::source::SourceSet;
use crate::state::{MigrationState, RunStatus};
use crate::target::{PostgresWriter, TargetWriter};
use crate::transfer::{TransferEngine, UnitStats};
use crate::unit::MigrationUnit;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// Where a run is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Preparing,
    Cleaning,
    Running(String),
    Completed,
    Failed,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunPhase::Idle => write!(f, "idle"),
            RunPhase::Preparing => write!(f, "preparing"),
            RunPhase::Cleaning => write!(f, "cleaning"),
            RunPhase::Running(unit) => write!(f, "running {}", unit),
            RunPhase::Completed => write!(f, "completed"),
            RunPhase::Failed => write!(f, "failed"),
        }
    }
}

/// Migration orchestrator.
pub struct Orchestrator {
    config: Config,
    units: Vec<MigrationUnit>,
    target: Arc<dyn TargetWriter>,
    sources: Arc<SourceSet>,
    engine: TransferEngine,
    phase: RunPhase,
    state_file: Option<PathBuf>,
    state: MigrationState,
}

/// One unit as it will run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitPlan {
    pub name: String,
    pub table: String,
    pub source: String,
    pub depends_on: Vec<String>,
    pub load_mode: LoadMode,
}

/// Outcome of one unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitSummary {
    pub name: String,
    pub table: String,
    /// "completed", "failed" or "skipped".
    pub status: String,
    #[serde(flatten)]
    pub stats: UnitStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of a migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationResult {
    /// Unique run identifier.
    pub run_id: String,

    /// Final status.
    pub status: String,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,

    pub units: Vec<UnitSummary>,

    /// The unit the run halted at.
    pub failed_unit: Option<String>,

    pub error: Option<String>,
}

impl Orchestrator {
    /// Connect to the configured databases and load the default catalog.
    pub async fn new(config: Config) -> Result<Self> {
        let target = PostgresWriter::new(
            &config.target,
            config.migration.max_pg_connections,
            config.migration.copy_batch_rows,
        )
        .await?;
        let sources = SourceSet::connect(&config).await?;
        let units = catalog::default_units(&config.migration);
        Self::with_target(config, units, Arc::new(target), Arc::new(sources))
    }

    /// Build an orchestrator over explicit units and endpoints.
    pub fn with_target(
        config: Config,
        units: Vec<MigrationUnit>,
        target: Arc<dyn TargetWriter>,
        sources: Arc<SourceSet>,
    ) -> Result<Self> {
        let units = order_units(units)?;
        for name in &config.migration.units {
            if !units.iter().any(|u| &u.name == name) {
                return Err(MigrateError::UnknownUnit(name.clone()));
            }
        }

        let engine = TransferEngine::new(target.clone(), sources.clone(), config.migration.clone());
        let state = MigrationState::new(uuid::Uuid::new_v4().to_string(), config.hash()?);
        Ok(Self {
            config,
            units,
            target,
            sources,
            engine,
            phase: RunPhase::Idle,
            state_file: None,
            state,
        })
    }

    /// Set the state file path for resume capability.
    pub fn with_state_file(mut self, path: PathBuf) -> Self {
        self.state_file = Some(path);
        self
    }

    /// Load existing state for resume.
    pub fn resume(mut self) -> Result<Self> {
        let path = self
            .state_file
            .clone()
            .ok_or_else(|| MigrateError::State("resume requires a state file".to_string()))?;
        if !path.exists() {
            return Err(MigrateError::State(format!(
                "state file {} does not exist",
                path.display()
            )));
        }
        let mut state = MigrationState::load(&path)?;
        state.validate_config(&self.config.hash()?)?;
        state.status = RunStatus::Running;
        state.completed_at = None;
        info!(
            "Resuming run {} from {:?} ({} units completed)",
            state.run_id,
            path,
            self.units
                .iter()
                .filter(|u| state.is_unit_completed(&u.name))
                .count()
        );
        self.state = state;
        Ok(self)
    }

    pub fn phase(&self) -> &RunPhase {
        &self.phase
    }

    pub fn state(&self) -> &MigrationState {
        &self.state
    }

    /// Units in execution order.
    pub fn plan(&self) -> Vec<UnitPlan> {
        self.units
            .iter()
            .map(|u| UnitPlan {
                name: u.name.clone(),
                table: u.table.name.clone(),
                source: u.source.describe(),
                depends_on: u.depends_on.clone(),
                load_mode: u.load_mode.clone(),
            })
            .collect()
    }

    /// Check that the destination and every source answer.
    pub async fn health_check(&self) -> Result<()> {
        self.target.health_check().await?;
        info!("Target ({}) is reachable", self.target.db_type());
        self.sources.health_check().await
    }

    fn ensure(&self, action: &str, allowed: bool) -> Result<()> {
        if allowed {
            Ok(())
        } else {
            Err(MigrateError::InvalidTransition {
                action: action.to_string(),
                phase: self.phase.to_string(),
            })
        }
    }

    /// Apply every unit's schema adjustments, in unit order.
    pub async fn prepare(&mut self) -> Result<()> {
        self.ensure("prepare", self.phase == RunPhase::Idle)?;
        self.phase = RunPhase::Preparing;

        let mut seen = HashSet::new();
        let statements: Vec<String> = self
            .units
            .iter()
            .flat_map(|u| u.prepare.iter())
            .filter(|s| seen.insert(s.as_str()))
            .cloned()
            .collect();

        info!("Preparing destination: {} statements", statements.len());
        if let Err(e) = self.target.execute_statements(&statements).await {
            self.phase = RunPhase::Failed;
            return Err(e);
        }
        Ok(())
    }

    /// Truncate every destination table once, in reverse dependency order.
    pub async fn clean(&mut self) -> Result<()> {
        self.ensure(
            "clean",
            matches!(self.phase, RunPhase::Idle | RunPhase::Preparing),
        )?;
        self.phase = RunPhase::Cleaning;

        let mut seen = HashSet::new();
        let tables: Vec<String> = self
            .units
            .iter()
            .rev()
            .map(|u| u.table.name.clone())
            .filter(|t| seen.insert(t.clone()))
            .collect();

        info!("Cleaning {} destination tables", tables.len());
        if let Err(e) = self.target.truncate(&tables, true).await {
            self.phase = RunPhase::Failed;
            return Err(e);
        }
        self.state.cleaned = true;
        self.save_state()?;
        Ok(())
    }

    /// Run a single unit. Its dependencies are expected to be loaded already.
    pub async fn run_unit(&mut self, name: &str) -> Result<MigrationResult> {
        if !self.units.iter().any(|u| u.name == name) {
            return Err(MigrateError::UnknownUnit(name.to_string()));
        }
        self.run_units(&[name.to_string()]).await
    }

    /// Run the given units in catalog order, halting at the first failure.
    pub async fn run_units(&mut self, names: &[String]) -> Result<MigrationResult> {
        self.ensure(
            "run",
            !matches!(self.phase, RunPhase::Failed | RunPhase::Completed),
        )?;
        for name in names {
            if !self.units.iter().any(|u| &u.name == name) {
                return Err(MigrateError::UnknownUnit(name.clone()));
            }
        }
        let selected: Vec<String> = self
            .units
            .iter()
            .filter(|u| names.contains(&u.name))
            .map(|u| u.name.clone())
            .collect();
        self.execute(selected).await
    }

    /// Prepare, clean and run every unit. A resumed run skips cleaning and
    /// the units already completed.
    pub async fn run_all(&mut self) -> Result<MigrationResult> {
        self.ensure("run_all", self.phase == RunPhase::Idle)?;

        if self.state.cleaned {
            info!("Destination already cleaned for run {}", self.state.run_id);
        } else {
            self.prepare().await?;
            self.clean().await?;
        }

        let selection = &self.config.migration.units;
        let names: Vec<String> = self
            .units
            .iter()
            .filter(|u| selection.is_empty() || selection.contains(&u.name))
            .map(|u| u.name.clone())
            .collect();
        self.execute(names).await
    }

    async fn execute(&mut self, names: Vec<String>) -> Result<MigrationResult> {
        let started_at = Utc::now();
        info!("Starting migration run {}: {} units", self.state.run_id, names.len());

        let mut summaries = Vec::new();
        let mut failure: Option<(String, String)> = None;

        for name in names {
            let Some(idx) = self.units.iter().position(|u| u.name == name) else {
                continue;
            };
            let table = self.units[idx].table.name.clone();

            if self.state.is_unit_completed(&name) {
                info!("{}: already completed, skipping", name);
                summaries.push(UnitSummary {
                    name,
                    table,
                    status: "skipped".to_string(),
                    stats: UnitStats::default(),
                    error: None,
                });
                continue;
            }

            self.phase = RunPhase::Running(name.clone());
            self.state.unit_mut(&name).mark_in_progress();
            self.save_state()?;

            match self.engine.execute(&mut self.units[idx]).await {
                Ok(stats) => {
                    self.state.unit_mut(&name).mark_completed(stats);
                    summaries.push(UnitSummary {
                        name,
                        table,
                        status: "completed".to_string(),
                        stats,
                        error: None,
                    });
                }
                Err(e) => {
                    let message = e.to_string();
                    error!("Unit {} failed, halting run: {}", name, message);
                    self.state.unit_mut(&name).mark_failed(&message);
                    summaries.push(UnitSummary {
                        name: name.clone(),
                        table,
                        status: "failed".to_string(),
                        stats: UnitStats::default(),
                        error: Some(message.clone()),
                    });
                    failure = Some((name, message));
                    break;
                }
            }
            self.save_state()?;
        }

        let status = if failure.is_some() {
            self.phase = RunPhase::Failed;
            self.state.mark_failed();
            "failed"
        } else {
            self.phase = RunPhase::Completed;
            self.state.mark_completed();
            "completed"
        };
        self.save_state()?;

        let completed_at = Utc::now();
        let (failed_unit, error) = match failure {
            Some((unit, message)) => (Some(unit), Some(message)),
            None => (None, None),
        };
        let result = MigrationResult {
            run_id: self.state.run_id.clone(),
            status: status.to_string(),
            duration_seconds: (completed_at - started_at).num_milliseconds() as f64 / 1000.0,
            started_at,
            completed_at,
            units: summaries,
            failed_unit,
            error,
        };

        info!(
            "Migration {}: {} units, {} rows inserted in {:.1}s",
            result.status,
            result.units.len(),
            result.rows_inserted(),
            result.duration_seconds
        );
        Ok(result)
    }

    fn save_state(&mut self) -> Result<()> {
        if let Some(ref path) = self.state_file {
            self.state.save(path)?;
        }
        Ok(())
    }
}

/// Order units so every unit follows its dependencies. Units with no
/// ordering constraint between them keep their declaration order.
pub fn order_units(units: Vec<MigrationUnit>) -> Result<Vec<MigrationUnit>> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    for (i, unit) in units.iter().enumerate() {
        if index.insert(unit.name.as_str(), i).is_some() {
            return Err(MigrateError::Config(format!(
                "unit {} is declared twice",
                unit.name
            )));
        }
    }

    let mut pending_deps = vec![0usize; units.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); units.len()];
    for (i, unit) in units.iter().enumerate() {
        for dep in &unit.depends_on {
            let Some(&d) = index.get(dep.as_str()) else {
                return Err(MigrateError::Config(format!(
                    "unit {} depends on unknown unit {}",
                    unit.name, dep
                )));
            };
            pending_deps[i] += 1;
            dependents[d].push(i);
        }
    }

    let mut order = Vec::with_capacity(units.len());
    let mut done = vec![false; units.len()];
    while order.len() < units.len() {
        let Some(next) = (0..units.len()).find(|&i| !done[i] && pending_deps[i] == 0) else {
            let stuck: Vec<&str> = (0..units.len())
                .filter(|&i| !done[i])
                .map(|i| units[i].name.as_str())
                .collect();
            return Err(MigrateError::DependencyCycle(stuck.join(", ")));
        };
        done[next] = true;
        for &dependent in &dependents[next] {
            pending_deps[dependent] -= 1;
        }
        order.push(next);
    }

    let mut slots: Vec<Option<MigrationUnit>> = units.into_iter().map(Some).collect();
    Ok(order
        .into_iter()
        .filter_map(|i| slots[i].take())
        .collect())
}

impl MigrationResult {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn is_success(&self) -> bool {
        self.failed_unit.is_none()
    }

    pub fn rows_inserted(&self) -> u64 {
        self.units.iter().map(|u| u.stats.inserted).sum()
    }

    /// Plain-text table of per-unit counts.
    pub fn summary(&self) -> String {
        let width = self
            .units
            .iter()
            .map(|u| u.name.len())
            .max()
            .unwrap_or(4)
            .max(4);

        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:<width$}  {:<9}  {:>7}  {:>8}  {:>8}  {:>8}  {:>9}  {:>8}  {:>7}",
            "unit",
            "status",
            "read",
            "accepted",
            "rejected",
            "modified",
            "malformed",
            "inserted",
            "present",
            width = width
        );
        for u in &self.units {
            let _ = writeln!(
                out,
                "{:<width$}  {:<9}  {:>7}  {:>8}  {:>8}  {:>8}  {:>9}  {:>8}  {:>7}",
                u.name,
                u.status,
                u.stats.read,
                u.stats.accepted,
                u.stats.rejected,
                u.stats.modified,
                u.stats.malformed,
                u.stats.inserted,
                u.stats.already_present,
                width = width
            );
        }
        let _ = write!(
            out,
            "run {} {} in {:.1}s",
            self.run_id, self.status, self.duration_seconds
        );
        if let (Some(unit), Some(error)) = (&self.failed_unit, &self.error) {
            let _ = write!(out, "\nhalted at {}: {}", unit, error);
        }
        out
    }
}
