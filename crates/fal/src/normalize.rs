//! Response normalization.
//!
//! fal endpoints return slightly different payloads: images as objects or
//! bare URLs, a single `image` instead of `images`, cost under
//! `meta.api_cost` or nowhere, NSFW flags or none, all optionally wrapped
//! in a `data` envelope. [`normalize_response`] folds them into one
//! [`GenerationResult`] or fails with
//! [`GenerationError::NoImagesReturned`].

use std::collections::BTreeMap;

use fluxstudio_core::cost::estimate_cost;
use fluxstudio_core::generation::{GeneratedImage, GenerationResult};
use fluxstudio_core::models::ModelDescriptor;
use serde_json::Value;

use crate::error::GenerationError;

/// Normalize one upstream payload for `descriptor`.
///
/// `request_id`, `elapsed_ms` and `logs` are left empty for the caller to
/// fill in.
pub fn normalize_response(
    descriptor: &ModelDescriptor,
    payload: Value,
) -> Result<GenerationResult, GenerationError> {
    let body = unwrap_envelope(&payload);

    let images = parse_images(body);
    if images.is_empty() {
        tracing::warn!(model_id = %descriptor.id, "Upstream response contained no usable images");
        return Err(GenerationError::NoImagesReturned);
    }

    let seed = parse_seed(body);
    let timings = parse_timings(body);
    let nsfw_flags = parse_nsfw_flags(body, images.len(), &descriptor.id);

    let dimensions: Vec<_> = images.iter().map(|i| (i.width, i.height)).collect();
    let cost = parse_upstream_cost(body)
        .or_else(|| estimate_cost(&dimensions, descriptor.cost_per_megapixel));

    Ok(GenerationResult {
        images,
        seed,
        timings,
        nsfw_flags,
        cost,
        request_id: None,
        elapsed_ms: 0,
        logs: Vec::new(),
        raw: payload,
    })
}

/// Step into a `data` envelope when the top level carries no images.
pub fn unwrap_envelope(payload: &Value) -> &Value {
    let has_images = payload.get("images").is_some() || payload.get("image").is_some();
    match payload.get("data") {
        Some(data) if !has_images && data.is_object() => data,
        _ => payload,
    }
}

fn parse_images(body: &Value) -> Vec<GeneratedImage> {
    let entries: Vec<&Value> = match (body.get("images"), body.get("image")) {
        (Some(Value::Array(items)), _) => items.iter().collect(),
        (_, Some(single)) if !single.is_null() => vec![single],
        _ => Vec::new(),
    };

    entries.into_iter().filter_map(parse_image).collect()
}

fn parse_image(entry: &Value) -> Option<GeneratedImage> {
    match entry {
        Value::String(url) if !url.trim().is_empty() => Some(GeneratedImage::new(url.trim())),
        Value::Object(obj) => {
            let url = obj.get("url").and_then(Value::as_str).map(str::trim)?;
            if url.is_empty() {
                return None;
            }
            Some(GeneratedImage {
                url: url.to_string(),
                width: obj.get("width").and_then(as_u32),
                height: obj.get("height").and_then(as_u32),
                content_type: obj
                    .get("content_type")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            })
        }
        _ => None,
    }
}

fn as_u32(value: &Value) -> Option<u32> {
    value.as_u64().and_then(|n| u32::try_from(n).ok())
}

fn parse_seed(body: &Value) -> Option<u64> {
    match body.get("seed")? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_timings(body: &Value) -> Option<BTreeMap<String, f64>> {
    let obj = body
        .get("timings")
        .or_else(|| body.get("timing"))
        .and_then(Value::as_object)?;
    Some(
        obj.iter()
            .filter_map(|(stage, secs)| secs.as_f64().map(|s| (stage.clone(), s)))
            .collect(),
    )
}

fn parse_nsfw_flags(body: &Value, image_count: usize, model_id: &str) -> Option<Vec<bool>> {
    let raw = body
        .get("has_nsfw_concepts")
        .or_else(|| body.get("nsfw_flags"))
        .and_then(Value::as_array)?;
    let flags: Option<Vec<bool>> = raw.iter().map(Value::as_bool).collect();
    match flags {
        Some(flags) if flags.len() == image_count => Some(flags),
        Some(flags) => {
            tracing::warn!(
                model_id,
                flags = flags.len(),
                images = image_count,
                "NSFW flag count does not match image count, dropping flags",
            );
            None
        }
        None => None,
    }
}

fn parse_upstream_cost(body: &Value) -> Option<f64> {
    body.get("meta")
        .and_then(|meta| meta.get("api_cost"))
        .and_then(Value::as_f64)
        .or_else(|| body.get("cost").and_then(Value::as_f64))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
