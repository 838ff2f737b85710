//! The freshet planner: logical-to-physical application transformation.
//!
//! Takes the logical application description produced by the submission
//! front-end and returns the physical description consumed by the runtime:
//! parallel regions expanded into replicated channels with splitters and
//! mergers materialized, consistent-cut regions discovered and merged, and
//! every connection resolved onto concrete PEs and PE ports.
//!
//! The transform is synchronous, single-threaded and a pure function of its
//! input: identical descriptions produce byte-identical outputs.

pub mod builder;
pub mod consistent_cut;
pub mod dump;
pub mod errors;
pub mod intrinsic;
pub mod model;
pub mod parallel;
pub mod physical;

#[cfg(test)]
mod tests;

use freshet_types::app::AppDescription;
use freshet_types::log::trace;
use freshet_types::physical::PhysicalAppDescription;
use freshet_types::serde::{Deserialize, Serialize};

use crate::errors::TransformError;
use crate::physical::PhysicalModel;

pub use crate::model::LogicalModel;

/// Options plumbed in by the embedding system. There is no process-wide
/// configuration state; every invocation carries its own.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(crate = "freshet_types::serde")]
pub struct TransformOptions {
    /// When set, the description's main composite must carry this name.
    pub main_composite: Option<String>,
    /// Dump the model to the trace log between stages.
    #[serde(default)]
    pub trace_model: bool,
}

/// Transforms a logical application description into its physical form.
///
/// No partial output: any fatal condition in any stage surfaces here and
/// nothing is returned.
pub fn transform(
    app: &AppDescription,
    options: &TransformOptions,
) -> Result<PhysicalAppDescription, TransformError> {
    let mut model = builder::build_logical_model(app, options)?;
    if options.trace_model {
        trace!("{}", dump::LogicalDump(&model));
    }

    parallel::perform_parallel_transform(&mut model)?;
    if options.trace_model {
        trace!("{}", dump::LogicalDump(&model));
    }

    consistent_cut::compute_cc_regions(&mut model)?;

    let physical = PhysicalModel::build(model)?;
    if options.trace_model {
        trace!("{}", dump::PhysicalDump(&physical));
    }
    physical.encode()
}
