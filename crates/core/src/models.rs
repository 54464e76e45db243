//! Model registry: the static catalogue of generation models and their
//! parameter schemas.
//!
//! Descriptors are built once at startup and never mutated. The registry is
//! the single source of truth for what a model accepts; the validator and
//! the CLI's schema-driven form both read from it.

use std::collections::HashSet;

use serde::Serialize;
use serde_json::{json, Value};

use crate::error::CoreError;
use crate::validation::coerce_value;

// ---------------------------------------------------------------------------
// Limits and option sets
// ---------------------------------------------------------------------------

/// Hard ceiling on images per request, across every model.
pub const MAX_IMAGES: u32 = 4;

/// Maximum number of LoRA weights a request may carry.
pub const MAX_LORAS: usize = 5;

/// Key of the image-count parameter.
pub const NUM_IMAGES_KEY: &str = "num_images";

/// Preset image sizes accepted by the `image_size` parameter.
pub const IMAGE_SIZES: &[&str] = &[
    "square_hd",
    "square",
    "portrait_4_3",
    "portrait_16_9",
    "landscape_4_3",
    "landscape_16_9",
];

/// Aspect ratios accepted by the ultra endpoints.
pub const ASPECT_RATIOS: &[&str] = &["21:9", "16:9", "4:3", "1:1", "3:4", "9:16", "9:21"];

/// Safety tolerance levels, most strict first.
pub const SAFETY_TOLERANCES: &[&str] = &["1", "2", "3", "4", "5", "6"];

/// Output encodings.
pub const OUTPUT_FORMATS: &[&str] = &["jpeg", "png"];

// ---------------------------------------------------------------------------
// Parameter schema
// ---------------------------------------------------------------------------

/// Shape of a single element in an array parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementShape {
    /// `{ "path": string, "scale": number }`
    LoraWeight,
}

/// The value kind of a parameter and its kind-specific constraints.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParameterKind {
    String,
    Number {
        /// Truncate toward zero after coercion.
        integer: bool,
        min: Option<f64>,
        max: Option<f64>,
    },
    Boolean,
    Enum {
        options: Vec<String>,
    },
    Array {
        element: ElementShape,
        max_len: usize,
    },
}

impl ParameterKind {
    /// Short lowercase name used in error messages and the CLI form.
    pub fn name(&self) -> &'static str {
        match self {
            ParameterKind::String => "string",
            ParameterKind::Number { integer: true, .. } => "integer",
            ParameterKind::Number { .. } => "number",
            ParameterKind::Boolean => "boolean",
            ParameterKind::Enum { .. } => "enum",
            ParameterKind::Array { .. } => "array",
        }
    }
}

/// One entry of a model's input schema.
///
/// Built with the kind constructors ([`string`](Self::string),
/// [`number`](Self::number), ...) and refined with the `with_*` methods.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterSpec {
    pub key: String,
    pub kind: ParameterKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ParameterSpec {
    fn new(key: impl Into<String>, kind: ParameterKind) -> Self {
        Self {
            key: key.into(),
            kind,
            default: None,
            required: false,
            description: None,
        }
    }

    pub fn string(key: impl Into<String>) -> Self {
        Self::new(key, ParameterKind::String)
    }

    pub fn number(key: impl Into<String>) -> Self {
        Self::new(
            key,
            ParameterKind::Number {
                integer: false,
                min: None,
                max: None,
            },
        )
    }

    pub fn integer(key: impl Into<String>) -> Self {
        Self::new(
            key,
            ParameterKind::Number {
                integer: true,
                min: None,
                max: None,
            },
        )
    }

    pub fn boolean(key: impl Into<String>) -> Self {
        Self::new(key, ParameterKind::Boolean)
    }

    pub fn enumeration(key: impl Into<String>, options: &[&str]) -> Self {
        Self::new(
            key,
            ParameterKind::Enum {
                options: options.iter().map(|o| o.to_string()).collect(),
            },
        )
    }

    pub fn lora_weights(key: impl Into<String>, max_len: usize) -> Self {
        Self::new(
            key,
            ParameterKind::Array {
                element: ElementShape::LoraWeight,
                max_len,
            },
        )
    }

    /// Attach a default value. Checked against the kind by
    /// [`ModelRegistry::new`].
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Mark the parameter as required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Clamp bounds for a number parameter. Ignored for other kinds.
    pub fn with_range(mut self, lo: f64, hi: f64) -> Self {
        if let ParameterKind::Number { min, max, .. } = &mut self.kind {
            *min = Some(lo);
            *max = Some(hi);
        }
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Verify that the default, if any, satisfies this parameter's kind.
    pub fn check_default(&self) -> Result<(), CoreError> {
        match &self.default {
            None => Ok(()),
            Some(default) => coerce_value(self, default).map(|_| ()).map_err(|e| {
                CoreError::InvalidRegistry(format!(
                    "default for '{}' does not satisfy its kind: {e}",
                    self.key
                ))
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Model descriptor
// ---------------------------------------------------------------------------

/// Static description of one generation model.
#[derive(Debug, Clone, Serialize)]
pub struct ModelDescriptor {
    /// Registry key, e.g. `flux-lora`.
    pub id: String,
    /// Provider model identifier, e.g. `fal-ai/flux-lora`.
    pub endpoint: String,
    /// Display name shown in listings and stored in history.
    pub name: String,
    pub description: String,
    /// Ordered input schema. `prompt` is handled by the validator directly
    /// and is not listed here.
    pub parameters: Vec<ParameterSpec>,
    /// Upper bound on images per request for this model (at most
    /// [`MAX_IMAGES`]).
    pub max_images: u32,
    /// Price per output megapixel in USD, when known.
    pub cost_per_megapixel: Option<f64>,
    /// Whether the model needs a source image (`image_url`).
    pub requires_image: bool,
}

impl ModelDescriptor {
    pub fn new(
        id: impl Into<String>,
        endpoint: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            endpoint: endpoint.into(),
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
            max_images: 1,
            cost_per_megapixel: None,
            requires_image: false,
        }
    }

    pub fn with_param(mut self, spec: ParameterSpec) -> Self {
        self.parameters.push(spec);
        self
    }

    pub fn with_max_images(mut self, max_images: u32) -> Self {
        self.max_images = max_images.clamp(1, MAX_IMAGES);
        self
    }

    pub fn with_cost_per_megapixel(mut self, cost: f64) -> Self {
        self.cost_per_megapixel = Some(cost);
        self
    }

    pub fn requiring_image(mut self) -> Self {
        self.requires_image = true;
        self
    }

    /// Look up a parameter spec by key.
    pub fn parameter(&self, key: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.key == key)
    }

    /// Whether the upstream endpoint accepts an explicit image count.
    pub fn accepts_image_count(&self) -> bool {
        self.parameter(NUM_IMAGES_KEY).is_some()
    }

    /// Default values for every parameter that has one, in schema order.
    pub fn defaults(&self) -> serde_json::Map<String, Value> {
        self.parameters
            .iter()
            .filter_map(|p| p.default.clone().map(|d| (p.key.clone(), d)))
            .collect()
    }

    fn check(&self) -> Result<(), CoreError> {
        let mut seen = HashSet::new();
        for spec in &self.parameters {
            if !seen.insert(spec.key.as_str()) {
                return Err(CoreError::InvalidRegistry(format!(
                    "duplicate parameter '{}' in model '{}'",
                    spec.key, self.id
                )));
            }
            spec.check_default()?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Ordered, immutable set of model descriptors.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: Vec<ModelDescriptor>,
}

impl ModelRegistry {
    /// Build a registry, checking id uniqueness, per-descriptor key
    /// uniqueness, and that every default satisfies its kind.
    pub fn new(models: Vec<ModelDescriptor>) -> Result<Self, CoreError> {
        let mut ids = HashSet::new();
        for model in &models {
            if !ids.insert(model.id.as_str()) {
                return Err(CoreError::InvalidRegistry(format!(
                    "duplicate model id '{}'",
                    model.id
                )));
            }
            model.check()?;
        }
        Ok(Self { models })
    }

    /// The built-in fal.ai FLUX catalogue.
    pub fn builtin() -> Self {
        Self {
            models: builtin_models(),
        }
    }

    /// Look up a model by registry id.
    pub fn describe(&self, id: &str) -> Result<&ModelDescriptor, CoreError> {
        self.models
            .iter()
            .find(|m| m.id == id)
            .ok_or_else(|| CoreError::ModelNotFound { id: id.to_string() })
    }

    /// Look up a model by its provider endpoint.
    pub fn find_by_endpoint(&self, endpoint: &str) -> Option<&ModelDescriptor> {
        self.models.iter().find(|m| m.endpoint == endpoint)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelDescriptor> {
        self.models.iter()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.models.iter().map(|m| m.id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

// ---------------------------------------------------------------------------
// Built-in catalogue
// ---------------------------------------------------------------------------

fn common_params(descriptor: ModelDescriptor) -> ModelDescriptor {
    descriptor
        .with_param(ParameterSpec::integer("seed").with_description("Fixed seed for reproducible output"))
        .with_param(ParameterSpec::boolean("sync_mode").with_default(json!(false)))
        .with_param(ParameterSpec::enumeration("output_format", OUTPUT_FORMATS).with_default(json!("jpeg")))
}

fn inference_params(descriptor: ModelDescriptor) -> ModelDescriptor {
    descriptor
        .with_param(
            ParameterSpec::integer("num_inference_steps")
                .with_default(json!(28))
                .with_range(1.0, 50.0),
        )
        .with_param(
            ParameterSpec::number("guidance_scale")
                .with_default(json!(3.5))
                .with_range(1.0, 10.0),
        )
}

fn safety_params(descriptor: ModelDescriptor, checker_on: bool, tolerance: &str) -> ModelDescriptor {
    descriptor
        .with_param(ParameterSpec::boolean("enable_safety_checker").with_default(json!(checker_on)))
        .with_param(
            ParameterSpec::enumeration("safety_tolerance", SAFETY_TOLERANCES)
                .with_default(json!(tolerance)),
        )
}

fn image_count(descriptor: ModelDescriptor) -> ModelDescriptor {
    descriptor.with_param(ParameterSpec::integer(NUM_IMAGES_KEY).with_default(json!(1)))
}

fn image_size(descriptor: ModelDescriptor) -> ModelDescriptor {
    descriptor.with_param(
        ParameterSpec::enumeration("image_size", IMAGE_SIZES).with_default(json!("landscape_4_3")),
    )
}

fn aspect_ratio(descriptor: ModelDescriptor) -> ModelDescriptor {
    descriptor.with_param(
        ParameterSpec::enumeration("aspect_ratio", ASPECT_RATIOS).with_default(json!("16:9")),
    )
}

/// Text-to-image models sharing the dev schema (dev, schnell, lora).
fn dev_family(id: &str, endpoint: &str, name: &str, description: &str) -> ModelDescriptor {
    let base = ModelDescriptor::new(id, endpoint, name, description).with_max_images(4);
    let base = image_size(image_count(base));
    let base = inference_params(base);
    let base = safety_params(base, false, "3");
    common_params(base)
}

fn builtin_models() -> Vec<ModelDescriptor> {
    let flux_pro = {
        let base = ModelDescriptor::new(
            "flux-1-pro",
            "fal-ai/flux-pro/new",
            "Flux.1 Pro",
            "High-quality image generation with standard aspect ratios",
        )
        .with_max_images(2)
        .with_cost_per_megapixel(0.05);
        common_params(inference_params(image_size(image_count(base))))
    };

    let flux_pro_ultra = {
        let base = ModelDescriptor::new(
            "flux-1.1-pro",
            "fal-ai/flux-pro/v1.1-ultra",
            "FLUX1.1 [pro] Ultra - High Res",
            "Ultra high-resolution image generation with flexible aspect ratios",
        )
        .with_cost_per_megapixel(0.05);
        let base = safety_params(aspect_ratio(base), true, "2");
        common_params(base).with_param(ParameterSpec::boolean("raw").with_default(json!(false)))
    };

    let flux_pro_redux = {
        let base = ModelDescriptor::new(
            "flux-1.1-pro-redux",
            "fal-ai/flux-pro/v1.1-ultra/redux",
            "FLUX1.1 Ultra Redux [pro]",
            "Next generation text-to-image model with enhanced capabilities",
        );
        let base = safety_params(aspect_ratio(image_count(base)), true, "2");
        common_params(base)
            .with_param(ParameterSpec::boolean("raw").with_default(json!(false)))
            .with_param(ParameterSpec::string("image_url").with_description("Reference image to remix"))
            .with_param(
                ParameterSpec::number("image_prompt_strength")
                    .with_default(json!(0.1))
                    .with_range(0.0, 1.0),
            )
    };

    let flux_pro_standard = {
        let base = ModelDescriptor::new(
            "flux-1.1-pro-standard",
            "fal-ai/flux-pro/v1.1",
            "Flux 1.1 Pro",
            "Standard-resolution FLUX1.1 [pro] with preset image sizes",
        );
        let base = image_count(base);
        let base = base.with_param(
            ParameterSpec::enumeration("image_size", IMAGE_SIZES).with_default(json!("portrait_4_3")),
        );
        common_params(safety_params(base, true, "6"))
    };

    let flux_lora = dev_family(
        "flux-lora",
        "fal-ai/flux-lora",
        "Flux LoRA",
        "Specialized model with LoRA adaptations",
    )
    .with_cost_per_megapixel(0.025)
    .with_param(
        ParameterSpec::lora_weights("loras", MAX_LORAS)
            .with_description("LoRA weights as {path, scale} entries"),
    );

    let flux_dev = dev_family(
        "flux-dev",
        "fal-ai/flux/dev",
        "Flux Dev",
        "Development version with experimental features",
    )
    .with_cost_per_megapixel(0.025);

    let flux_schnell = dev_family(
        "flux-schnell",
        "fal-ai/flux/schnell",
        "Flux Schnell",
        "Fast inference optimized model",
    )
    .with_cost_per_megapixel(0.003);

    let flux_img2img = dev_family(
        "flux-img2img",
        "fal-ai/flux/dev/image-to-image",
        "Flux Image-to-Image",
        "Image-to-image generation with controllable strength",
    )
    .requiring_image()
    .with_param(
        ParameterSpec::string("image_url")
            .required()
            .with_description("Source image to transform"),
    )
    .with_param(
        ParameterSpec::number("strength")
            .with_default(json!(0.95))
            .with_range(0.0, 1.0),
    );

    vec![
        flux_pro,
        flux_pro_ultra,
        flux_pro_redux,
        flux_pro_standard,
        flux_lora,
        flux_dev,
        flux_schnell,
        flux_img2img,
    ]
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
