use anyhow::{anyhow, Result};
use std::io::{self, BufRead, Write};

use crate::conversion::Plane;
use crate::state::ThresholdMode;

///////////////////////////////////////////////////////
/// Threshold Selection
///////////////////////////////////////////////////////

/// Otsu's method over the full 16-bit histogram. Returns the lowest
/// foreground intensity, i.e. the inclusive lower bound to threshold at.
pub fn otsu_threshold(plane: &Plane) -> f64 {
    let mut histogram = vec![0u64; 65536];
    for p in plane.pixels() {
        histogram[p[0] as usize] += 1;
    }

    let total = plane.width() as f64 * plane.height() as f64;
    if total == 0.0 {
        return 0.0;
    }

    let sum: f64 = histogram
        .iter()
        .enumerate()
        .map(|(i, &c)| i as f64 * c as f64)
        .sum();

    let mut sum_b = 0.0;
    let mut weight_b = 0.0;
    let mut max_variance = 0.0;
    let mut threshold = 0usize;

    for (t, &count) in histogram.iter().enumerate() {
        weight_b += count as f64;
        if weight_b == 0.0 {
            continue;
        }
        let weight_f = total - weight_b;
        if weight_f == 0.0 {
            break;
        }
        sum_b += t as f64 * count as f64;

        let mean_b = sum_b / weight_b;
        let mean_f = (sum - sum_b) / weight_f;
        let variance = weight_b * weight_f * (mean_b - mean_f) * (mean_b - mean_f);

        if variance > max_variance {
            max_variance = variance;
            threshold = t;
        }
    }

    (threshold + 1) as f64
}

/// Asks for a threshold, offering `suggested` as the default. Blocks until a
/// line is read. An empty line or end of input accepts the suggestion.
pub fn prompt_threshold<R: BufRead, W: Write>(
    channel_name: &str,
    suggested: f64,
    input: &mut R,
    output: &mut W,
) -> Result<f64> {
    loop {
        write!(
            output,
            "Threshold for channel {} [{}]: ",
            channel_name, suggested
        )?;
        output.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Ok(suggested);
        }

        let answer = line.trim();
        if answer.is_empty() {
            return Ok(suggested);
        }
        match answer.parse::<f64>() {
            Ok(v) if v.is_finite() && v >= 0.0 => return Ok(v),
            _ => writeln!(output, "'{}' is not a valid threshold", answer)?,
        }
    }
}

/// Chooses the per-image threshold according to the configured mode.
pub struct ThresholdSelector {
    pub mode: ThresholdMode,
    pub fixed: f64,
}

impl ThresholdSelector {
    pub fn select(&self, plane: &Plane, channel_name: &str) -> Result<f64> {
        let value = match self.mode {
            ThresholdMode::Fixed => self.fixed,
            ThresholdMode::Otsu => otsu_threshold(plane),
            ThresholdMode::Prompt => {
                let suggested = otsu_threshold(plane);
                let stdin = io::stdin();
                let stdout = io::stdout();
                prompt_threshold(channel_name, suggested, &mut stdin.lock(), &mut stdout.lock())?
            }
        };
        if !value.is_finite() {
            return Err(anyhow!("Threshold for channel {} is not finite", channel_name));
        }
        Ok(value)
    }
}
