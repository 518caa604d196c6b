//! Window statistics.

use super::{mean, population_variance, rolling, rolling_pair};
use crate::runtime::{Series, ops};

pub fn highest(source: &Series, length: usize) -> Series {
    rolling(source, length, |w| w.iter().copied().reduce(f64::max))
}

pub fn lowest(source: &Series, length: usize) -> Series {
    rolling(source, length, |w| w.iter().copied().reduce(f64::min))
}

/// source - source[length].
pub fn change(source: &Series, length: usize) -> Series {
    ops::sub(source, source.shift(length))
}

/// Running sum; unavailable bars contribute nothing once the sum has started.
pub fn cum(source: &Series) -> Series {
    let mut total: Option<f64> = None;
    source
        .iter()
        .map(|v| {
            if let Some(v) = v {
                total = Some(total.unwrap_or(0.0) + v);
            }
            total
        })
        .collect()
}

/// Pearson correlation over the window.
pub fn correlation(a: &Series, b: &Series, length: usize) -> Series {
    rolling_pair(a, b, length, |xs, ys| {
        let cov = population_covariance(xs, ys);
        let denom = (population_variance(xs) * population_variance(ys)).sqrt();
        if denom == 0.0 { None } else { Some(cov / denom) }
    })
}

/// Population covariance over the window.
pub fn covariance(a: &Series, b: &Series, length: usize) -> Series {
    rolling_pair(a, b, length, |xs, ys| Some(population_covariance(xs, ys)))
}

pub fn median(source: &Series, length: usize) -> Series {
    rolling(source, length, |w| {
        let mut sorted = w.to_vec();
        sorted.sort_by(f64::total_cmp);
        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 0 {
            Some((sorted[mid - 1] + sorted[mid]) / 2.0)
        } else {
            Some(sorted[mid])
        }
    })
}

/// Most frequent value in the window; ties go to the smallest value.
pub fn mode(source: &Series, length: usize) -> Series {
    rolling(source, length, |w| {
        let mut sorted = w.to_vec();
        sorted.sort_by(f64::total_cmp);
        let mut best = (sorted[0], 0usize);
        let mut run = (sorted[0], 0usize);
        for v in sorted {
            if v == run.0 {
                run.1 += 1;
            } else {
                run = (v, 1);
            }
            if run.1 > best.1 {
                best = run;
            }
        }
        Some(best.0)
    })
}

/// Percent of the previous `length` values that are <= the current value.
pub fn percentrank(source: &Series, length: usize) -> Series {
    rolling(source, length + 1, |w| {
        let (current, previous) = w.split_last()?;
        let at_or_below = previous.iter().filter(|v| **v <= *current).count();
        Some(100.0 * at_or_below as f64 / length as f64)
    })
}

fn population_covariance(xs: &[f64], ys: &[f64]) -> f64 {
    let mx = mean(xs);
    let my = mean(ys);
    xs.iter()
        .zip(ys)
        .map(|(x, y)| (x - mx) * (y - my))
        .sum::<f64>()
        / xs.len() as f64
}
