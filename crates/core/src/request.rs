//! Validated generation request.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::ParamMap;
use crate::validation::PROMPT_KEY;

/// A request that has passed validation for one model.
///
/// Built only by [`crate::validation::validate`]; constructed fresh per
/// submission and never persisted directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub model_id: String,
    pub prompt: String,
    /// Number of images requested, already clamped for the model.
    pub image_count: u32,
    /// Validated parameters in schema order.
    pub params: ParamMap,
}

impl GenerationRequest {
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    /// Build the JSON input object sent upstream.
    ///
    /// The prompt comes first, followed by every validated parameter.
    /// Empty arrays are left out so an unused LoRA list is never sent.
    pub fn to_input(&self) -> Value {
        let mut input = ParamMap::new();
        input.insert(PROMPT_KEY.to_string(), Value::String(self.prompt.clone()));
        for (key, value) in &self.params {
            if matches!(value, Value::Array(items) if items.is_empty()) {
                continue;
            }
            input.insert(key.clone(), value.clone());
        }
        Value::Object(input)
    }
}
