//! Scalar error measures over an output vector.

use crate::error::{check_len, Result};

/// Mean of squared differences. An empty pair scores 0.
pub fn mse(target: &[f64], output: &[f64]) -> Result<f64> {
    check_len("output", target.len(), output.len())?;
    if output.is_empty() {
        return Ok(0.0);
    }
    let sum: f64 = target
        .iter()
        .zip(output)
        .map(|(t, o)| (t - o).powi(2))
        .sum();
    Ok(sum / output.len() as f64)
}

/// Binary cross entropy summed over the outputs; outputs are clamped away
/// from 0 and 1.
pub fn cross_entropy(target: &[f64], output: &[f64]) -> Result<f64> {
    const EPS: f64 = 1e-15;
    check_len("output", target.len(), output.len())?;
    Ok(target
        .iter()
        .zip(output)
        .map(|(&t, &o)| {
            let o = o.clamp(EPS, 1.0 - EPS);
            -(t * o.ln() + (1.0 - t) * (1.0 - o).ln())
        })
        .sum())
}
