pub mod app;
pub mod ids;
pub mod physical;

#[cfg(test)]
mod tests;

// Re-exports of the common dependency stack. Downstream crates import these
// as `freshet_types::log`, `freshet_types::thiserror` and so on, keeping one
// version of each across the workspace.
pub use indexmap;
pub use log;
pub use serde;
pub use serde_json;
pub use serde_yaml;
pub use thiserror;
