//! Stage agents: the fixed pipeline roles and what each one may do.
//!
//! A stage is a role in the delivery pipeline, not a process. The runner
//! executes whatever instruction a stage produces; the types here define
//! the order stages run in, the prompts they send and the commands they
//! are allowed to issue.

mod capability;
mod prompt;

pub use capability::{run_local, CapabilityError, StageCommand};
pub use prompt::{build_prompt, REQUIREMENTS_FILE};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Pipeline stage, in execution order.
///
/// The ordering is total and fixed: `Planner < Builder < Qa < ProdReady`.
/// Every workflow visits stages strictly in this order and never skips
/// ahead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Planner,
    Builder,
    Qa,
    ProdReady,
}

impl Stage {
    /// All stages in execution order.
    pub const ALL: [Stage; 4] = [Stage::Planner, Stage::Builder, Stage::Qa, Stage::ProdReady];

    /// The stage that runs after this one, or `None` for the last stage.
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Planner => Some(Stage::Builder),
            Stage::Builder => Some(Stage::Qa),
            Stage::Qa => Some(Stage::ProdReady),
            Stage::ProdReady => None,
        }
    }

    /// Stages from this one to the end of the pipeline, inclusive.
    pub fn remaining(self) -> impl Iterator<Item = Stage> {
        Stage::ALL.into_iter().skip_while(move |stage| *stage < self)
    }

    /// Stable identifier used in persisted records, events and task ids.
    pub fn id(self) -> &'static str {
        match self {
            Stage::Planner => "planner",
            Stage::Builder => "builder",
            Stage::Qa => "qa",
            Stage::ProdReady => "prod_ready",
        }
    }

    /// Human-facing role name for prompts and log lines.
    pub fn role(self) -> &'static str {
        match self {
            Stage::Planner => "Planner",
            Stage::Builder => "Builder",
            Stage::Qa => "QA",
            Stage::ProdReady => "Production Readiness",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Stage {
    type Err = UnknownStage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "planner" => Ok(Stage::Planner),
            "builder" => Ok(Stage::Builder),
            "qa" => Ok(Stage::Qa),
            "prod_ready" | "prod-ready" => Ok(Stage::ProdReady),
            other => Err(UnknownStage(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown stage: {0} (expected planner, builder, qa or prod_ready)")]
pub struct UnknownStage(String);
