//! Load plans
//!
//! A plan is what `Runner::init` will do, worked out without touching the
//! network: which backend, which artifacts to fetch and in what order.

use serde::Serialize;

use crate::backend::BackendKind;

/// Artifacts fetched before the backend is constructed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FetchPlan {
    /// Engine module first, then the model weights
    EngineAndModel { engine: String, model: String },
    /// Every file listed by a manifest
    Manifest { manifest: String },
    /// The model locator alone; the backend still opens its model path
    Model { model: String },
    /// The backend opens its model itself
    Nothing,
}

impl FetchPlan {
    /// Locators in fetch order (a manifest counts as one)
    pub fn locators(&self) -> Vec<&str> {
        match self {
            FetchPlan::EngineAndModel { engine, model } => vec![engine.as_str(), model.as_str()],
            FetchPlan::Manifest { manifest } => vec![manifest.as_str()],
            FetchPlan::Model { model } => vec![model.as_str()],
            FetchPlan::Nothing => Vec::new(),
        }
    }
}

/// Everything `init` needs to know up front
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadPlan {
    /// Registry name or direct model locator
    pub model: String,
    pub kind: BackendKind,
    pub fetch: FetchPlan,
    /// Resolved model path for path-based backends
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locators_in_fetch_order() {
        let plan = FetchPlan::EngineAndModel {
            engine: "/models/engine.wasm".to_string(),
            model: "/models/tiny.bin".to_string(),
        };
        assert_eq!(plan.locators(), vec!["/models/engine.wasm", "/models/tiny.bin"]);
        assert!(FetchPlan::Nothing.locators().is_empty());
    }

    #[test]
    fn test_plan_json() {
        let plan = LoadPlan {
            model: "gpt2".to_string(),
            kind: BackendKind::GenerationPipeline,
            fetch: FetchPlan::Nothing,
            model_path: Some("http://host/models/gpt2".to_string()),
        };
        let value = serde_json::to_value(&plan).unwrap();
        assert_eq!(value["kind"], "generation-pipeline");
        assert_eq!(value["fetch"]["type"], "nothing");
    }
}
