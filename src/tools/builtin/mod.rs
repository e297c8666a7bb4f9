//! Built-in tools available to every worker.

pub mod echo;
pub mod time;

use std::sync::Arc;

pub use echo::EchoTool;
pub use time::TimeTool;

use crate::tools::Tool;

pub fn all() -> Vec<Arc<dyn Tool>> {
    vec![Arc::new(EchoTool), Arc::new(TimeTool)]
}
