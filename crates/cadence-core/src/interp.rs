//! Render-side interpolation between two simulated ticks.
//!
//! `draw` hooks receive [`StateContext::tick_alpha`](crate::context::StateContext::tick_alpha):
//! how far the display refresh sits between the last simulated tick and
//! the next. Keep the previous and current tick's values and blend them:
//!
//! ```
//! use cadence_core::interp::lerp;
//!
//! let drawn_x = lerp(10.0, 20.0, 0.25);
//! assert!((drawn_x - 12.5).abs() < 1e-9);
//! ```

/// Linear interpolation: `(after - before) * alpha + before`.
///
/// `alpha = 0` yields `before` and `alpha = 1` yields `after`.
pub fn lerp(before: f64, after: f64, alpha: f64) -> f64 {
    (after - before).mul_add(alpha, before)
}

/// [`lerp`] over `f32`.
pub fn lerp_f32(before: f32, after: f32, alpha: f32) -> f32 {
    (after - before).mul_add(alpha, before)
}
