//! The optimizer boundary and its in-process backends.

mod colony;
mod ilp;

pub use colony::AntColony;
pub use ilp::IlpOptimizer;

use crate::config::{ColonyConfig, OptimizerKind};
use crate::data::{ReferenceData, TimeTable};
use crate::error::OptimizerError;
use std::future::Future;

/// An opaque search process that refines timetables one step at a time.
///
/// `submit` hands over the base state whose locked assignments must be kept;
/// `advance` runs one refinement step and returns a candidate. Candidates are
/// untrusted and get re-validated by the caller.
pub trait Optimizer: Send {
    fn submit(&mut self, base: &TimeTable) -> impl Future<Output = Result<(), OptimizerError>> + Send;

    fn advance(&mut self) -> impl Future<Output = Result<TimeTable, OptimizerError>> + Send;
}

/// The backend selected by configuration.
pub enum Backend {
    Colony(AntColony),
    Ilp(IlpOptimizer),
}

impl Backend {
    pub fn build(
        kind: OptimizerKind,
        reference: &ReferenceData,
        colony: &ColonyConfig,
    ) -> Result<Self, OptimizerError> {
        Ok(match kind {
            OptimizerKind::Colony => Backend::Colony(AntColony::new(reference, colony.clone())?),
            OptimizerKind::Ilp => Backend::Ilp(IlpOptimizer::new(reference.clone())),
        })
    }
}

impl Optimizer for Backend {
    async fn submit(&mut self, base: &TimeTable) -> Result<(), OptimizerError> {
        match self {
            Backend::Colony(o) => o.submit(base).await,
            Backend::Ilp(o) => o.submit(base).await,
        }
    }

    async fn advance(&mut self) -> Result<TimeTable, OptimizerError> {
        match self {
            Backend::Colony(o) => o.advance().await,
            Backend::Ilp(o) => o.advance().await,
        }
    }
}
