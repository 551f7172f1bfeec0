//! Model info command

use anyhow::Result;
use serde::Serialize;

use super::{RunnerArgs, Session};
use crate::config::ModelSelection;
use crate::engine::LoadPlan;
use crate::model::ModelDescriptor;

#[derive(Serialize)]
struct ModelInfo<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    descriptor: Option<&'a ModelDescriptor>,
    plan: LoadPlan,
    cache_enabled: bool,
}

/// Print the model's descriptor and what `init` would fetch, as JSON
pub async fn info(args: RunnerArgs) -> Result<()> {
    let session = Session::open(args.load_config()?)?;

    let descriptor = match session.config.runner.selection()? {
        ModelSelection::Registry(name) => Some(session.registry.lookup(name)?),
        ModelSelection::Direct { .. } => None,
    };

    let info = ModelInfo {
        descriptor,
        plan: session.require_runner()?.plan()?,
        cache_enabled: session.config.runner.enable_cache,
    };

    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}
