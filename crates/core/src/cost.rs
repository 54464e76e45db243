//! Cost estimation from output resolution.
//!
//! Prices are per output megapixel and live on each
//! [`ModelDescriptor`](crate::models::ModelDescriptor).

/// Pixels per megapixel.
const PIXELS_PER_MEGAPIXEL: f64 = 1_000_000.0;

/// Round to 3 decimal places (tenths of a cent).
pub fn round_cost(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Cost of a single image, rounded to 3 decimals.
pub fn image_cost(width: u32, height: u32, cost_per_megapixel: f64) -> f64 {
    let megapixels = (width as f64 * height as f64) / PIXELS_PER_MEGAPIXEL;
    round_cost(megapixels * cost_per_megapixel)
}

/// Sum of per-image costs, each rounded, then rounded again.
///
/// Returns `None` when the model has no price or any image is missing its
/// dimensions, since a partial sum would understate the real charge.
pub fn estimate_cost(
    dimensions: &[(Option<u32>, Option<u32>)],
    cost_per_megapixel: Option<f64>,
) -> Option<f64> {
    let cpm = cost_per_megapixel?;
    let mut total = 0.0;
    for (width, height) in dimensions {
        total += image_cost((*width)?, (*height)?, cpm);
    }
    Some(round_cost(total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn square_megapixel_image_at_lora_price() {
        // 1.048576 MP * 0.025 = 0.0262144
        assert_eq!(image_cost(1024, 1024, 0.025), 0.026);
    }

    #[test]
    fn costs_sum_per_image() {
        let dims = [(Some(1024), Some(1024)), (Some(1024), Some(768))];
        // 0.026 + 0.020 (0.786432 * 0.025 = 0.0196608)
        assert_eq!(estimate_cost(&dims, Some(0.025)), Some(0.046));
    }

    #[test]
    fn unpriced_model_has_no_cost() {
        assert_eq!(estimate_cost(&[(Some(1024), Some(1024))], None), None);
    }

    #[test]
    fn missing_dimensions_yield_no_cost() {
        assert_eq!(estimate_cost(&[(Some(1024), None)], Some(0.05)), None);
    }

    #[test]
    fn empty_image_list_costs_nothing() {
        assert_eq!(estimate_cost(&[], Some(0.05)), Some(0.0));
    }
}
