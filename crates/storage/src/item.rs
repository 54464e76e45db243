//! Persisted history entries.

use chrono::Utc;
use fluxstudio_core::generation::GenerationResult;
use fluxstudio_core::models::{ModelDescriptor, ModelRegistry, NUM_IMAGES_KEY};
use fluxstudio_core::request::GenerationRequest;
use fluxstudio_core::types::{ParamMap, Timestamp};
use fluxstudio_core::validation::{MODEL_KEY, PROMPT_KEY};
use serde::de::{self, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The request as it was sent, kept for inspection and remixing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSnapshot {
    #[serde(default)]
    pub model_id: String,
    /// Older entries store the endpoint under `model`.
    #[serde(alias = "model")]
    pub endpoint: String,
    pub prompt: String,
    #[serde(default = "default_num_images")]
    pub num_images: u32,
    /// Validated parameters, in schema order. Older entries call this
    /// `options` and key it in camelCase.
    #[serde(default, alias = "options")]
    pub params: ParamMap,
}

fn default_num_images() -> u32 {
    1
}

/// One completed generation in the history.
///
/// Field names are camelCase on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryItem {
    pub id: Uuid,
    /// URL of the primary image.
    pub image_url: String,
    pub prompt: String,
    /// Display name of the model.
    pub model: String,
    #[serde(default)]
    pub model_id: String,
    #[serde(default)]
    pub cost: Option<f64>,
    pub created_at: Timestamp,
    pub request_details: RequestSnapshot,
    /// Untouched upstream payload.
    pub response_details: Value,
    /// Older entries store one newline-joined string.
    #[serde(default, deserialize_with = "deserialize_logs")]
    pub logs: Vec<String>,
}

fn deserialize_logs<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct LogsVisitor;
    impl<'de> Visitor<'de> for LogsVisitor {
        type Value = Vec<String>;
        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("string or array of strings")
        }
        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            Ok(v.lines().map(str::to_string).collect())
        }
        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }
        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut lines = Vec::new();
            while let Some(line) = seq.next_element::<String>()? {
                lines.push(line);
            }
            Ok(lines)
        }
    }
    deserializer.deserialize_any(LogsVisitor)
}

impl HistoryItem {
    /// Build a new entry from a finished generation.
    pub fn from_generation(
        descriptor: &ModelDescriptor,
        request: &GenerationRequest,
        result: &GenerationResult,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            image_url: result
                .primary_image()
                .map(|image| image.url.clone())
                .unwrap_or_default(),
            prompt: request.prompt.clone(),
            model: descriptor.name.clone(),
            model_id: descriptor.id.clone(),
            cost: result.cost,
            created_at: Utc::now(),
            request_details: RequestSnapshot {
                model_id: request.model_id.clone(),
                endpoint: descriptor.endpoint.clone(),
                prompt: request.prompt.clone(),
                num_images: request.image_count,
                params: request.params.clone(),
            },
            response_details: result.raw.clone(),
            logs: result.logs.clone(),
        }
    }

    /// Fill in what entries written by the older web app lack: the model
    /// id (looked up by endpoint) and snake_case parameter keys.
    ///
    /// Returns `false` when the entry was already current.
    pub fn upgrade_legacy(&mut self, registry: &ModelRegistry) -> bool {
        if !self.model_id.is_empty() {
            return false;
        }
        let snapshot = &mut self.request_details;
        if let Some(descriptor) = registry.find_by_endpoint(&snapshot.endpoint) {
            self.model_id = descriptor.id.clone();
            snapshot.model_id = descriptor.id.clone();
        }
        snapshot.params = std::mem::take(&mut snapshot.params)
            .into_iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(key, value)| (snake_case(&key), value))
            .collect();
        true
    }

    /// Parameter bag that reproduces this generation.
    ///
    /// Carries `model`, `prompt` and `num_images` alongside the stored
    /// parameters, ready to go back through validation.
    pub fn remix_bag(&self) -> Value {
        let snapshot = &self.request_details;
        let mut bag = ParamMap::new();
        bag.insert(MODEL_KEY.to_string(), Value::String(snapshot.model_id.clone()));
        bag.insert(PROMPT_KEY.to_string(), Value::String(snapshot.prompt.clone()));
        for (key, value) in &snapshot.params {
            bag.insert(key.clone(), value.clone());
        }
        bag.entry(NUM_IMAGES_KEY)
            .or_insert_with(|| Value::from(snapshot.num_images));
        Value::Object(bag)
    }
}

fn snake_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for c in key.chars() {
        if c.is_ascii_uppercase() {
            out.push('_');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use fluxstudio_core::generation::GeneratedImage;
    use fluxstudio_core::models::ModelRegistry;
    use fluxstudio_core::validation::validate_submission;
    use serde_json::json;

    fn generate(bag: Value) -> (HistoryItem, GenerationRequest) {
        let registry = ModelRegistry::builtin();
        let request = validate_submission(&registry, &bag).unwrap();
        let descriptor = registry.describe(&request.model_id).unwrap();
        let result = GenerationResult {
            images: vec![GeneratedImage::new("https://cdn/a.jpg").with_size(1024, 768)],
            seed: Some(9),
            timings: None,
            nsfw_flags: None,
            cost: Some(0.02),
            request_id: Some("req".into()),
            elapsed_ms: 1200,
            logs: vec!["done".into()],
            raw: json!({"images": [{"url": "https://cdn/a.jpg"}]}),
        };
        (HistoryItem::from_generation(descriptor, &request, &result), request)
    }

    #[test]
    fn item_captures_request_and_result() {
        let (item, request) = generate(json!({"model": "flux-dev", "prompt": "a fox", "seed": 5}));
        assert_eq!(item.image_url, "https://cdn/a.jpg");
        assert_eq!(item.model_id, "flux-dev");
        assert_eq!(item.model, "Flux Dev");
        assert_eq!(item.cost, Some(0.02));
        assert_eq!(item.request_details.endpoint, "fal-ai/flux/dev");
        assert_eq!(item.request_details.params, request.params);
        assert_eq!(item.logs, vec!["done"]);
    }

    #[test]
    fn item_serializes_camel_case() {
        let (item, _) = generate(json!({"model": "flux-dev", "prompt": "a fox"}));
        let json = serde_json::to_value(&item).unwrap();
        for key in ["id", "imageUrl", "modelId", "createdAt", "requestDetails", "responseDetails"] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        assert!(json["requestDetails"].get("numImages").is_some());
    }

    #[test]
    fn web_app_entries_are_upgraded() {
        let legacy = json!({
            "id": "6f1c2a1e-8a4b-4c3d-9e2f-0a1b2c3d4e5f",
            "imageUrl": "https://cdn/old.jpg",
            "prompt": "a barn owl",
            "model": "Flux LoRA",
            "cost": 0.01,
            "createdAt": "2024-11-02T10:15:00.000Z",
            "requestDetails": {
                "prompt": "a barn owl",
                "imageSize": "landscape_4_3",
                "model": "fal-ai/flux-lora",
                "numImages": 1,
                "options": {
                    "numInferenceSteps": 30,
                    "guidanceScale": 4.5,
                    "enableSafetyChecker": true,
                    "outputFormat": "png"
                }
            },
            "responseDetails": {"images": [{"url": "https://cdn/old.jpg"}]},
            "logs": "queued\nstep 1/30"
        });

        let mut item: HistoryItem = serde_json::from_value(legacy).unwrap();
        assert_eq!(item.logs, vec!["queued", "step 1/30"]);
        assert_eq!(item.request_details.endpoint, "fal-ai/flux-lora");

        assert!(item.upgrade_legacy(&ModelRegistry::builtin()));
        assert_eq!(item.model_id, "flux-lora");
        assert_eq!(item.request_details.params["num_inference_steps"], json!(30));
        assert_eq!(item.request_details.params["guidance_scale"], json!(4.5));

        let request = validate_submission(&ModelRegistry::builtin(), &item.remix_bag()).unwrap();
        assert_eq!(request.model_id, "flux-lora");
        assert_eq!(request.params["output_format"], json!("png"));

        assert!(!item.upgrade_legacy(&ModelRegistry::builtin()));
    }

    #[test]
    fn remix_bag_revalidates_to_same_request() {
        let (item, request) = generate(json!({
            "model": "flux-lora",
            "prompt": "a cat",
            "num_images": 2,
            "loras": [{"path": "https://x/y.safetensors", "scale": 0.7}]
        }));
        let bag = item.remix_bag();
        assert_eq!(bag["model"], "flux-lora");
        assert_eq!(bag["num_images"], 2);

        let again = validate_submission(&ModelRegistry::builtin(), &bag).unwrap();
        assert_eq!(again, request);
    }
}
