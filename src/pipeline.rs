//! Pipeline definitions and phase progression.
//!
//! A pipeline is an ordered list of pre-phases, run while an item is
//! `Scoping`, and main phases, run while it is `InProgress`. Destructive
//! phases are exclusive: at most a configured number may run at once.

use crate::errors::CoordinatorError;
use crate::item::{
    self, ItemStatus, PhasePool, WorkItem, set_phase, set_phase_pool, set_status,
    set_unblock_context,
};
use crate::store::Item;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

pub const DEFAULT_PIPELINE: &str = "feature";

/// One step of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseConfig {
    pub name: String,
    /// Must not run concurrently with other destructive phases
    #[serde(default)]
    pub destructive: bool,
}

impl PhaseConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            destructive: false,
        }
    }

    pub fn destructive(name: &str) -> Self {
        Self {
            name: name.to_string(),
            destructive: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub pre_phases: Vec<PhaseConfig>,
    #[serde(default)]
    pub phases: Vec<PhaseConfig>,
}

impl PipelineConfig {
    /// Built-in pipeline used when nothing else is configured.
    pub fn feature() -> Self {
        Self {
            pre_phases: vec![PhaseConfig::new("research")],
            phases: vec![
                PhaseConfig::new("prd"),
                PhaseConfig::new("design"),
                PhaseConfig::new("spec"),
                PhaseConfig::destructive("build"),
                PhaseConfig::new("review"),
            ],
        }
    }

    pub fn pool(&self, pool: PhasePool) -> &[PhaseConfig] {
        match pool {
            PhasePool::Pre => &self.pre_phases,
            PhasePool::Main => &self.phases,
        }
    }

    pub fn phase_index(&self, pool: PhasePool, name: &str) -> Option<usize> {
        self.pool(pool).iter().position(|p| p.name == name)
    }

    pub fn phase(&self, pool: PhasePool, name: &str) -> Option<&PhaseConfig> {
        self.pool(pool).iter().find(|p| p.name == name)
    }

    pub fn first(&self, pool: PhasePool) -> Option<&PhaseConfig> {
        self.pool(pool).first()
    }

    /// Phase following `name` in the same pool, if any.
    pub fn next_after(&self, pool: PhasePool, name: &str) -> Option<&PhaseConfig> {
        let index = self.phase_index(pool, name)?;
        self.pool(pool).get(index + 1)
    }

    pub fn is_empty(&self) -> bool {
        self.pre_phases.is_empty() && self.phases.is_empty()
    }
}

/// Named pipelines plus the default used for items without a pipeline type.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSet {
    default: String,
    pipelines: BTreeMap<String, PipelineConfig>,
}

impl Default for PipelineSet {
    fn default() -> Self {
        Self::new(DEFAULT_PIPELINE, BTreeMap::new())
    }
}

impl PipelineSet {
    /// The built-in `feature` pipeline is always available unless overridden.
    pub fn new(default: &str, mut pipelines: BTreeMap<String, PipelineConfig>) -> Self {
        pipelines
            .entry(DEFAULT_PIPELINE.to_string())
            .or_insert_with(PipelineConfig::feature);
        Self {
            default: default.to_string(),
            pipelines,
        }
    }

    pub fn default_name(&self) -> &str {
        &self.default
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.pipelines.keys().map(String::as_str)
    }

    pub fn get(&self, name: &str) -> Option<&PipelineConfig> {
        self.pipelines.get(name)
    }

    /// Pipeline for a pipeline type; unknown or absent types use the default.
    pub fn resolve(&self, pipeline_type: Option<&str>) -> Option<&PipelineConfig> {
        pipeline_type
            .and_then(|name| self.pipelines.get(name))
            .or_else(|| self.pipelines.get(&self.default))
    }

    /// Whether `pipeline_type` names a configured pipeline. Absent means the default.
    pub fn is_known(&self, pipeline_type: Option<&str>) -> bool {
        pipeline_type.is_none_or(|name| self.pipelines.contains_key(name))
    }

    fn resolve_for(&self, item: &Item) -> Result<&PipelineConfig, CoordinatorError> {
        let pipeline_type = item::read_pipeline_type(item);
        self.resolve(pipeline_type).ok_or_else(|| {
            CoordinatorError::invalid_transition(
                &item.id,
                format!("no pipeline named '{}' is configured", self.default),
            )
        })
    }

    /// Current phase of an item as configured in its pipeline.
    pub fn current_phase(&self, item: &WorkItem) -> Option<&PhaseConfig> {
        let name = item.phase()?;
        let pool = item.phase_pool().or_else(|| pool_for_status(item.status()))?;
        self.resolve(item.pipeline_type())?.phase(pool, name)
    }

    /// Position of the item's current phase, used to order furthest-along first.
    pub fn phase_index(&self, item: &WorkItem) -> Option<usize> {
        let name = item.phase()?;
        let pool = item.phase_pool().or_else(|| pool_for_status(item.status()))?;
        self.resolve(item.pipeline_type())?.phase_index(pool, name)
    }

    pub fn is_destructive(&self, item: &WorkItem) -> bool {
        self.current_phase(item).is_some_and(|p| p.destructive)
    }

    /// Warnings about definitions that will misbehave at runtime.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if !self.pipelines.contains_key(&self.default) {
            warnings.push(format!(
                "Default pipeline '{}' is not defined (available: {})",
                self.default,
                self.names().collect::<Vec<_>>().join(", ")
            ));
        }
        for (name, pipeline) in &self.pipelines {
            if pipeline.is_empty() {
                warnings.push(format!("Pipeline '{}' has no phases", name));
            } else if pipeline.phases.is_empty() {
                warnings.push(format!(
                    "Pipeline '{}' has no main phases; items finish as soon as they are promoted",
                    name
                ));
            }
            for pool in [PhasePool::Pre, PhasePool::Main] {
                let mut seen = HashSet::new();
                for phase in pipeline.pool(pool) {
                    if phase.name.trim().is_empty() {
                        warnings.push(format!("Pipeline '{}' has a phase with an empty name", name));
                    } else if !seen.insert(phase.name.as_str()) {
                        warnings.push(format!(
                            "Pipeline '{}' repeats {} phase '{}'",
                            name, pool, phase.name
                        ));
                    }
                }
            }
        }
        warnings
    }
}

fn pool_for_status(status: ItemStatus) -> Option<PhasePool> {
    match status {
        ItemStatus::Scoping => Some(PhasePool::Pre),
        ItemStatus::InProgress => Some(PhasePool::Main),
        _ => None,
    }
}

/// Where an item landed after a promotion or phase completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// Entered a phase
    Phase {
        name: String,
        pool: PhasePool,
        destructive: bool,
    },
    /// Finished scoping
    Ready,
    Done,
}

impl std::fmt::Display for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Progress::Phase { name, pool, .. } => write!(f, "{} phase '{}'", pool, name),
            Progress::Ready => write!(f, "ready"),
            Progress::Done => write!(f, "done"),
        }
    }
}

fn enter(item: &mut Item, status: ItemStatus, pool: PhasePool, phase: &PhaseConfig) -> Progress {
    set_status(item, status);
    set_phase(item, Some(&phase.name));
    set_phase_pool(item, Some(pool));
    Progress::Phase {
        name: phase.name.clone(),
        pool,
        destructive: phase.destructive,
    }
}

fn leave(item: &mut Item, status: ItemStatus) -> Progress {
    set_status(item, status);
    set_phase(item, None);
    set_phase_pool(item, None);
    if status == ItemStatus::Done {
        Progress::Done
    } else {
        Progress::Ready
    }
}

/// Advance an item's domain sub-state: `New` enters scoping, `Ready` enters
/// the main pipeline.
pub fn promote(item: &mut Item, pipelines: &PipelineSet) -> Result<Progress, CoordinatorError> {
    let status = item::read_status(item);
    let pipeline = pipelines.resolve_for(item)?;
    match status {
        ItemStatus::New => match pipeline.first(PhasePool::Pre) {
            Some(first) => Ok(enter(item, ItemStatus::Scoping, PhasePool::Pre, first)),
            None => Ok(leave(item, ItemStatus::Ready)),
        },
        ItemStatus::Ready => match pipeline.first(PhasePool::Main) {
            Some(first) => Ok(enter(item, ItemStatus::InProgress, PhasePool::Main, first)),
            None => Ok(leave(item, ItemStatus::Done)),
        },
        other => Err(CoordinatorError::invalid_transition(
            &item.id,
            format!("only new or ready items can be promoted (item is {})", other),
        )),
    }
}

/// Check that `phase` is the phase `item` is currently running and return
/// the pool it runs in.
pub fn check_running_phase(item: &Item, phase: &str) -> Result<PhasePool, CoordinatorError> {
    let status = item::read_status(item);
    let Some(default_pool) = pool_for_status(status) else {
        return Err(CoordinatorError::invalid_transition(
            &item.id,
            format!("no phase is running while the item is {}", status),
        ));
    };
    match item::read_phase(item) {
        Some(current) if current == phase => {}
        Some(current) => {
            return Err(CoordinatorError::invalid_transition(
                &item.id,
                format!("reported phase '{}' but current phase is '{}'", phase, current),
            ));
        }
        None => {
            return Err(CoordinatorError::invalid_transition(
                &item.id,
                format!("reported phase '{}' but no phase is recorded", phase),
            ));
        }
    }
    Ok(item::read_phase_pool(item).unwrap_or(default_pool))
}

/// Record completion of `phase` and move to the next phase, to `Ready` after
/// the last pre-phase, or to `Done` after the last main phase.
pub fn advance(
    item: &mut Item,
    phase: &str,
    pipelines: &PipelineSet,
) -> Result<Progress, CoordinatorError> {
    let pool = check_running_phase(item, phase)?;
    let pipeline = pipelines.resolve_for(item)?;
    if pipeline.phase_index(pool, phase).is_none() {
        return Err(CoordinatorError::invalid_transition(
            &item.id,
            format!("phase '{}' is not a {} phase of this pipeline", phase, pool),
        ));
    }

    // The answer that unblocked this phase has been consumed.
    set_unblock_context(item, None);
    let status = match pool {
        PhasePool::Pre => ItemStatus::Scoping,
        PhasePool::Main => ItemStatus::InProgress,
    };
    match pipeline.next_after(pool, phase) {
        Some(next) => Ok(enter(item, status, pool, next)),
        None if pool == PhasePool::Pre => Ok(leave(item, ItemStatus::Ready)),
        None => Ok(leave(item, ItemStatus::Done)),
    }
}
