use anyhow::{bail, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::analysis::Roi;
use crate::conversion::Plane;

const RANDOMIZATION: &str = "Fay (x,y translation)";

/// Pearson's correlation of `a` and `b` sampled at the ROI pixels, with `b`
/// read at an (dx, dy) offset. Pairs falling outside `b` are skipped. Returns
/// NaN when either signal is constant.
pub fn pearson_r(a: &Plane, b: &Plane, roi: &Roi, dx: i64, dy: i64) -> f64 {
    let (w, h) = b.dimensions();
    let mut n = 0f64;
    let (mut sa, mut sb, mut saa, mut sbb, mut sab) = (0f64, 0f64, 0f64, 0f64, 0f64);

    for &(x, y) in &roi.pixels {
        let bx = x as i64 + dx;
        let by = y as i64 + dy;
        if bx < 0 || by < 0 || bx >= w as i64 || by >= h as i64 {
            continue;
        }
        let va = a.get_pixel(x, y)[0] as f64;
        let vb = b.get_pixel(bx as u32, by as u32)[0] as f64;
        n += 1.0;
        sa += va;
        sb += vb;
        saa += va * va;
        sbb += vb * vb;
        sab += va * vb;
    }

    let cov = sab - sa * sb / n;
    let var_a = saa - sa * sa / n;
    let var_b = sbb - sb * sb / n;
    if n < 2.0 || var_a <= 0.0 || var_b <= 0.0 {
        return f64::NAN;
    }
    cov / (var_a * var_b).sqrt()
}

/// Per-ROI colocalisation test: observed Pearson's R against the distribution
/// of R under random translations of the second channel.
#[derive(Debug, Clone)]
pub struct ColocalisationTest {
    pub iterations: usize,
    pub max_shift: i32,
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColocalisationResult {
    pub r_obs: f64,
    pub r_rand_mean: f64,
    pub r_rand_sd: f64,
    pub rand_above_obs: usize,
    pub p_value: f64,
}

impl ColocalisationTest {
    pub fn headers() -> Vec<String> {
        [
            "ROI",
            "R(obs)",
            "R(rand) mean",
            "R(rand) sd",
            "R(rand)>R(obs)",
            "P-value",
            "Iterations",
            "Randomization",
        ]
        .iter()
        .map(|h| h.to_string())
        .collect()
    }

    /// Runs the test for the ROI at `index`. The random translations are
    /// seeded from `seed` and `index`, so results are reproducible.
    pub fn run(&self, a: &Plane, b: &Plane, roi: &Roi, index: usize) -> Result<ColocalisationResult> {
        if a.dimensions() != b.dimensions() {
            bail!("Colocalisation planes differ in size");
        }
        if self.max_shift < 1 {
            bail!("Colocalisation randomisation needs a maximum shift of at least 1 pixel");
        }

        let r_obs = pearson_r(a, b, roi, 0, 0);

        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(index as u64));
        let shift = self.max_shift as i64;
        let mut randomised = Vec::with_capacity(self.iterations);
        while randomised.len() < self.iterations {
            let dx = rng.random_range(-shift..=shift);
            let dy = rng.random_range(-shift..=shift);
            if dx == 0 && dy == 0 {
                continue;
            }
            randomised.push(pearson_r(a, b, roi, dx, dy));
        }

        let finite: Vec<f64> = randomised.iter().copied().filter(|r| r.is_finite()).collect();
        let (r_rand_mean, r_rand_sd) = if finite.is_empty() {
            (f64::NAN, f64::NAN)
        } else {
            let n = finite.len() as f64;
            let mean = finite.iter().sum::<f64>() / n;
            let var = finite.iter().map(|r| (r - mean) * (r - mean)).sum::<f64>() / n;
            (mean, var.sqrt())
        };

        let rand_above_obs = finite.iter().filter(|r| **r > r_obs).count();
        // An undefined observed correlation has no significance
        let p_value = if self.iterations > 0 && r_obs.is_finite() {
            rand_above_obs as f64 / self.iterations as f64
        } else {
            f64::NAN
        };

        Ok(ColocalisationResult {
            r_obs,
            r_rand_mean,
            r_rand_sd,
            rand_above_obs,
            p_value,
        })
    }

    pub fn row(&self, number: usize, result: &ColocalisationResult) -> Vec<String> {
        vec![
            number.to_string(),
            format!("{:.4}", result.r_obs),
            format!("{:.4}", result.r_rand_mean),
            format!("{:.4}", result.r_rand_sd),
            result.rand_above_obs.to_string(),
            format!("{:.4}", result.p_value),
            self.iterations.to_string(),
            RANDOMIZATION.to_owned(),
        ]
    }
}
