//! Parameter validator: turns a raw key/value bag into a
//! [`GenerationRequest`] for a given model, or a structured
//! [`ValidationError`].
//!
//! Pure and deterministic. The same bag and descriptor always produce the
//! same request or the same error.

use serde_json::{Number, Value};

use crate::error::CoreError;
use crate::models::{
    ElementShape, ModelDescriptor, ModelRegistry, ParameterKind, ParameterSpec, MAX_IMAGES,
    NUM_IMAGES_KEY,
};
use crate::request::GenerationRequest;
use crate::types::ParamMap;

/// Key of the prompt in a raw bag.
pub const PROMPT_KEY: &str = "prompt";

/// Key of the model id in a raw bag (read by [`validate_submission`]).
pub const MODEL_KEY: &str = "model";

/// Scale assigned to a LoRA entry that does not specify one.
pub const DEFAULT_LORA_SCALE: f64 = 1.0;

/// A rejected parameter bag. Raised locally, never sent upstream.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Missing required parameter '{key}'")]
    MissingRequiredParameter { key: String },

    #[error("Invalid value '{got}' for '{key}'. Must be one of: {allowed_list}", allowed_list = .allowed.join(", "))]
    InvalidEnumValue {
        key: String,
        allowed: Vec<String>,
        got: String,
    },

    #[error("'{key}' must be a number")]
    InvalidNumber { key: String },

    #[error("'{key}' must be a {expected}")]
    InvalidType { key: String, expected: &'static str },

    #[error("'{key}' accepts at most {max} entries, got {got}")]
    TooManyEntries { key: String, max: usize, got: usize },

    #[error("Invalid entry {index} in '{key}': {reason}")]
    InvalidArrayElement {
        key: String,
        index: usize,
        reason: String,
    },

    #[error("Prompt must not be empty")]
    EmptyPrompt,

    #[error("Parameters must be a JSON object")]
    NotAnObject,
}

impl ValidationError {
    /// The offending parameter key, when the error concerns one.
    pub fn key(&self) -> Option<&str> {
        match self {
            ValidationError::MissingRequiredParameter { key }
            | ValidationError::InvalidEnumValue { key, .. }
            | ValidationError::InvalidNumber { key }
            | ValidationError::InvalidType { key, .. }
            | ValidationError::TooManyEntries { key, .. }
            | ValidationError::InvalidArrayElement { key, .. } => Some(key),
            ValidationError::EmptyPrompt => Some(PROMPT_KEY),
            ValidationError::NotAnObject => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Resolve the bag's `model` key against the registry, then [`validate`].
pub fn validate_submission(
    registry: &ModelRegistry,
    bag: &Value,
) -> Result<GenerationRequest, CoreError> {
    let obj = bag.as_object().ok_or(ValidationError::NotAnObject)?;
    let model_id = match obj.get(MODEL_KEY) {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim(),
        Some(Value::String(_)) | None | Some(Value::Null) => {
            return Err(ValidationError::MissingRequiredParameter {
                key: MODEL_KEY.to_string(),
            }
            .into())
        }
        Some(_) => {
            return Err(ValidationError::InvalidType {
                key: MODEL_KEY.to_string(),
                expected: "string",
            }
            .into())
        }
    };
    let descriptor = registry.describe(model_id)?;
    Ok(validate(descriptor, bag)?)
}

/// Validate a raw parameter bag against a model's schema.
///
/// - Missing keys take their default; required keys without one fail.
/// - Keys the schema does not know are ignored.
/// - The image count is clamped into `[1, max_images]`, never rejected for
///   range.
pub fn validate(
    descriptor: &ModelDescriptor,
    bag: &Value,
) -> Result<GenerationRequest, ValidationError> {
    let obj = bag.as_object().ok_or(ValidationError::NotAnObject)?;

    let prompt = validate_prompt(obj.get(PROMPT_KEY))?;

    let mut params = ParamMap::new();
    let mut image_count = 1u32;

    for spec in &descriptor.parameters {
        let value = match obj.get(&spec.key) {
            Some(raw) if !is_absent(raw) => coerce_value(spec, raw)?,
            _ => match (&spec.default, spec.required) {
                (Some(default), _) => default.clone(),
                (None, true) => {
                    return Err(ValidationError::MissingRequiredParameter {
                        key: spec.key.clone(),
                    })
                }
                (None, false) => continue,
            },
        };

        if spec.key == NUM_IMAGES_KEY {
            image_count = clamp_image_count(&value, descriptor.max_images);
            params.insert(spec.key.clone(), Value::from(image_count));
            continue;
        }

        params.insert(spec.key.clone(), value);
    }

    for key in obj.keys() {
        if key != PROMPT_KEY && key != MODEL_KEY && descriptor.parameter(key).is_none() {
            tracing::debug!(model_id = %descriptor.id, key = %key, "Ignoring unknown parameter");
        }
    }

    Ok(GenerationRequest {
        model_id: descriptor.id.clone(),
        prompt,
        image_count,
        params,
    })
}

/// Coerce a present value to the parameter's kind.
///
/// Used by [`validate`] and by the registry to check defaults.
pub fn coerce_value(spec: &ParameterSpec, value: &Value) -> Result<Value, ValidationError> {
    match &spec.kind {
        ParameterKind::String => match value {
            Value::String(s) => Ok(Value::String(s.clone())),
            _ => Err(invalid_type(spec, "string")),
        },
        ParameterKind::Number { integer, min, max } => {
            coerce_number(&spec.key, value, *integer, *min, *max)
        }
        ParameterKind::Boolean => coerce_boolean(spec, value),
        ParameterKind::Enum { options } => coerce_enum(spec, value, options),
        ParameterKind::Array { element, max_len } => coerce_array(spec, value, *element, *max_len),
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn validate_prompt(value: Option<&Value>) -> Result<String, ValidationError> {
    match value {
        None | Some(Value::Null) => Err(ValidationError::MissingRequiredParameter {
            key: PROMPT_KEY.to_string(),
        }),
        Some(Value::String(s)) if s.trim().is_empty() => Err(ValidationError::EmptyPrompt),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(ValidationError::InvalidType {
            key: PROMPT_KEY.to_string(),
            expected: "string",
        }),
    }
}

/// `null` and blank strings count as absent: an empty seed or image URL
/// field means "not set", not an invalid value.
fn is_absent(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn invalid_type(spec: &ParameterSpec, expected: &'static str) -> ValidationError {
    ValidationError::InvalidType {
        key: spec.key.clone(),
        expected,
    }
}

fn clamp_image_count(value: &Value, max_images: u32) -> u32 {
    let upper = max_images.clamp(1, MAX_IMAGES) as i64;
    let n = match value {
        Value::Number(n) if n.is_u64() && n.as_i64().is_none() => upper,
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(1),
        _ => 1,
    };
    n.clamp(1, upper) as u32
}

fn coerce_number(
    key: &str,
    value: &Value,
    integer: bool,
    min: Option<f64>,
    max: Option<f64>,
) -> Result<Value, ValidationError> {
    let invalid = || ValidationError::InvalidNumber {
        key: key.to_string(),
    };

    // Integers that already fit are passed through untouched so large seeds
    // keep full precision.
    if integer && min.is_none() && max.is_none() {
        if let Value::Number(n) = value {
            if n.is_i64() || n.is_u64() {
                return Ok(value.clone());
            }
        }
        if let Value::String(s) = value {
            if let Ok(n) = s.trim().parse::<i64>() {
                return Ok(Value::from(n));
            }
        }
    }

    let mut n = match value {
        Value::Number(n) => n.as_f64().ok_or_else(invalid)?,
        Value::String(s) => s.trim().parse::<f64>().map_err(|_| invalid())?,
        _ => return Err(invalid()),
    };
    if !n.is_finite() {
        return Err(invalid());
    }

    if let Some(lo) = min {
        n = n.max(lo);
    }
    if let Some(hi) = max {
        n = n.min(hi);
    }

    if integer {
        Ok(Value::from(n.trunc() as i64))
    } else {
        Number::from_f64(n).map(Value::Number).ok_or_else(invalid)
    }
}

fn coerce_boolean(spec: &ParameterSpec, value: &Value) -> Result<Value, ValidationError> {
    match value {
        Value::Bool(b) => Ok(Value::Bool(*b)),
        Value::String(s) if s.trim().eq_ignore_ascii_case("true") => Ok(Value::Bool(true)),
        Value::String(s) if s.trim().eq_ignore_ascii_case("false") => Ok(Value::Bool(false)),
        _ => Err(invalid_type(spec, "boolean")),
    }
}

fn coerce_enum(
    spec: &ParameterSpec,
    value: &Value,
    options: &[String],
) -> Result<Value, ValidationError> {
    let got = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    };
    if options.iter().any(|o| *o == got) {
        Ok(Value::String(got))
    } else {
        Err(ValidationError::InvalidEnumValue {
            key: spec.key.clone(),
            allowed: options.to_vec(),
            got,
        })
    }
}

fn coerce_array(
    spec: &ParameterSpec,
    value: &Value,
    element: ElementShape,
    max_len: usize,
) -> Result<Value, ValidationError> {
    let items = value.as_array().ok_or_else(|| invalid_type(spec, "array"))?;

    if items.len() > max_len {
        return Err(ValidationError::TooManyEntries {
            key: spec.key.clone(),
            max: max_len,
            got: items.len(),
        });
    }

    let coerced = items
        .iter()
        .enumerate()
        .map(|(index, item)| match element {
            ElementShape::LoraWeight => coerce_lora_weight(&spec.key, index, item),
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Value::Array(coerced))
}

fn coerce_lora_weight(key: &str, index: usize, item: &Value) -> Result<Value, ValidationError> {
    let element_error = |reason: &str| ValidationError::InvalidArrayElement {
        key: key.to_string(),
        index,
        reason: reason.to_string(),
    };

    let obj = item
        .as_object()
        .ok_or_else(|| element_error("expected an object with 'path' and 'scale'"))?;

    let path = match obj.get("path") {
        Some(Value::String(p)) if !p.trim().is_empty() => p.trim().to_string(),
        _ => return Err(element_error("'path' must be a non-empty string")),
    };

    let scale = match obj.get("scale") {
        None | Some(Value::Null) => DEFAULT_LORA_SCALE,
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| element_error("'scale' must be a number"))?,
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| element_error("'scale' must be a number"))?,
        Some(_) => return Err(element_error("'scale' must be a number")),
    };

    let scale = Number::from_f64(scale).ok_or_else(|| element_error("'scale' must be finite"))?;

    let mut weight = serde_json::Map::new();
    weight.insert("path".to_string(), Value::String(path));
    weight.insert("scale".to_string(), Value::Number(scale));
    Ok(Value::Object(weight))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn lora() -> ModelDescriptor {
        ModelRegistry::builtin().describe("flux-lora").unwrap().clone()
    }

    // --- Prompt ---

    #[test]
    fn missing_prompt_is_required() {
        assert_matches!(
            validate(&lora(), &json!({})),
            Err(ValidationError::MissingRequiredParameter { key }) if key == "prompt"
        );
    }

    #[test]
    fn blank_prompt_is_rejected() {
        assert_eq!(
            validate(&lora(), &json!({"prompt": "   "})),
            Err(ValidationError::EmptyPrompt)
        );
    }

    #[test]
    fn non_object_bag_is_rejected() {
        assert_eq!(
            validate(&lora(), &json!(["a cat"])),
            Err(ValidationError::NotAnObject)
        );
    }

    // --- Defaults ---

    #[test]
    fn missing_keys_take_their_defaults() {
        let request = validate(&lora(), &json!({"prompt": "a cat"})).unwrap();
        assert_eq!(request.params["num_inference_steps"], json!(28));
        assert_eq!(request.params["guidance_scale"], json!(3.5));
        assert_eq!(request.params["output_format"], json!("jpeg"));
        assert_eq!(request.params["enable_safety_checker"], json!(false));
        assert_eq!(request.params["image_size"], json!("landscape_4_3"));
        assert!(!request.params.contains_key("seed"));
    }

    #[test]
    fn required_key_without_default_fails() {
        let img2img = ModelRegistry::builtin().describe("flux-img2img").unwrap().clone();
        assert_matches!(
            validate(&img2img, &json!({"prompt": "a cat"})),
            Err(ValidationError::MissingRequiredParameter { key }) if key == "image_url"
        );
    }

    #[test]
    fn null_and_blank_values_count_as_absent() {
        let request = validate(
            &lora(),
            &json!({"prompt": "a cat", "seed": "", "guidance_scale": null}),
        )
        .unwrap();
        assert!(!request.params.contains_key("seed"));
        assert_eq!(request.params["guidance_scale"], json!(3.5));
    }

    #[test]
    fn blank_required_string_is_missing() {
        let img2img = ModelRegistry::builtin().describe("flux-img2img").unwrap().clone();
        assert_matches!(
            validate(&img2img, &json!({"prompt": "a cat", "image_url": " "})),
            Err(ValidationError::MissingRequiredParameter { key }) if key == "image_url"
        );
    }

    // --- Numbers ---

    #[test]
    fn numeric_strings_are_coerced() {
        let request = validate(&lora(), &json!({"prompt": "a cat", "guidance_scale": "3.5"})).unwrap();
        assert_eq!(request.params["guidance_scale"], json!(3.5));
    }

    #[test]
    fn non_numeric_string_is_invalid_number() {
        assert_matches!(
            validate(&lora(), &json!({"prompt": "a cat", "guidance_scale": "abc"})),
            Err(ValidationError::InvalidNumber { key }) if key == "guidance_scale"
        );
    }

    #[test]
    fn integer_parameters_truncate() {
        let request =
            validate(&lora(), &json!({"prompt": "a cat", "num_inference_steps": "30.9"})).unwrap();
        assert_eq!(request.params["num_inference_steps"], json!(30));
    }

    #[test]
    fn bounded_numbers_are_clamped() {
        let request =
            validate(&lora(), &json!({"prompt": "a cat", "num_inference_steps": 500})).unwrap();
        assert_eq!(request.params["num_inference_steps"], json!(50));
    }

    #[test]
    fn large_seeds_keep_precision() {
        let request =
            validate(&lora(), &json!({"prompt": "a cat", "seed": 9007199254740993u64})).unwrap();
        assert_eq!(request.params["seed"], json!(9007199254740993u64));
    }

    // --- Booleans and enums ---

    #[test]
    fn boolean_strings_are_coerced() {
        let request =
            validate(&lora(), &json!({"prompt": "a cat", "enable_safety_checker": "TRUE"})).unwrap();
        assert_eq!(request.params["enable_safety_checker"], json!(true));
    }

    #[test]
    fn non_boolean_is_invalid_type() {
        assert_matches!(
            validate(&lora(), &json!({"prompt": "a cat", "sync_mode": 1})),
            Err(ValidationError::InvalidType { key, expected: "boolean" }) if key == "sync_mode"
        );
    }

    #[test]
    fn enum_outside_set_is_rejected() {
        let err = validate(&lora(), &json!({"prompt": "a cat", "output_format": "gif"})).unwrap_err();
        assert_eq!(
            err,
            ValidationError::InvalidEnumValue {
                key: "output_format".into(),
                allowed: vec!["jpeg".into(), "png".into()],
                got: "gif".into(),
            }
        );
        assert_eq!(
            err.to_string(),
            "Invalid value 'gif' for 'output_format'. Must be one of: jpeg, png"
        );
    }

    #[test]
    fn numeric_enum_values_are_stringified() {
        let request = validate(&lora(), &json!({"prompt": "a cat", "safety_tolerance": 4})).unwrap();
        assert_eq!(request.params["safety_tolerance"], json!("4"));
    }

    // --- LoRA list ---

    #[test]
    fn lora_entries_are_normalized() {
        let request = validate(
            &lora(),
            &json!({"prompt": "a cat", "loras": [{"path": " https://x/a.safetensors "}, {"path": "b", "scale": "0.5"}]}),
        )
        .unwrap();
        assert_eq!(
            request.params["loras"],
            json!([
                {"path": "https://x/a.safetensors", "scale": 1.0},
                {"path": "b", "scale": 0.5}
            ])
        );
    }

    #[test]
    fn too_many_loras_are_rejected_not_dropped() {
        let loras: Vec<_> = (0..6).map(|i| json!({"path": format!("l{i}"), "scale": 1})).collect();
        assert_eq!(
            validate(&lora(), &json!({"prompt": "a cat", "loras": loras})),
            Err(ValidationError::TooManyEntries {
                key: "loras".into(),
                max: 5,
                got: 6,
            })
        );
    }

    #[test]
    fn lora_without_path_is_invalid_element() {
        assert_matches!(
            validate(&lora(), &json!({"prompt": "a cat", "loras": [{"path": "a"}, {"scale": 1}]})),
            Err(ValidationError::InvalidArrayElement { index: 1, .. })
        );
    }

    // --- Image count ---

    #[test]
    fn image_count_is_clamped() {
        let high = validate(&lora(), &json!({"prompt": "a cat", "num_images": 12})).unwrap();
        assert_eq!(high.image_count, 4);
        assert_eq!(high.params["num_images"], json!(4));

        let low = validate(&lora(), &json!({"prompt": "a cat", "num_images": "0"})).unwrap();
        assert_eq!(low.image_count, 1);
    }

    #[test]
    fn image_count_beyond_i64_saturates_to_maximum() {
        let bag = json!({"prompt": "a cat", "num_images": u64::MAX});
        let request = validate(&lora(), &bag).unwrap();
        assert_eq!(request.image_count, 4);
        assert_eq!(request.params["num_images"], json!(4));

        let bag = json!({"prompt": "a cat", "num_images": -9_223_372_036_854_775_808i64});
        assert_eq!(validate(&lora(), &bag).unwrap().image_count, 1);
    }

    #[test]
    fn image_count_respects_model_maximum() {
        let pro = ModelRegistry::builtin().describe("flux-1-pro").unwrap().clone();
        let request = validate(&pro, &json!({"prompt": "a cat", "num_images": 4})).unwrap();
        assert_eq!(request.image_count, 2);
    }

    #[test]
    fn non_numeric_image_count_is_invalid_number() {
        assert_matches!(
            validate(&lora(), &json!({"prompt": "a cat", "num_images": "many"})),
            Err(ValidationError::InvalidNumber { key }) if key == "num_images"
        );
    }

    // --- Submission ---

    #[test]
    fn submission_resolves_model_from_bag() {
        let registry = ModelRegistry::builtin();
        let request = validate_submission(
            &registry,
            &json!({"prompt": "a cat", "model": "flux-lora", "loras": []}),
        )
        .unwrap();
        assert_eq!(request.model_id, "flux-lora");
        assert_eq!(request.params["loras"], json!([]));
    }

    #[test]
    fn submission_with_unknown_model_is_not_found() {
        let registry = ModelRegistry::builtin();
        assert_matches!(
            validate_submission(&registry, &json!({"prompt": "a cat", "model": "dall-e"})),
            Err(CoreError::ModelNotFound { .. })
        );
    }

    #[test]
    fn validation_is_deterministic() {
        let bag = json!({"prompt": "a cat", "seed": "42", "loras": [{"path": "a"}]});
        assert_eq!(validate(&lora(), &bag), validate(&lora(), &bag));
    }
}
