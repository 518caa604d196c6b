//! Complexity classifier.
//!
//! Eight factors, each `min(raw / normalizer, 1.0)`, combined by fixed
//! weights into a score in [0, 1]. The normalizers are an empirical starting
//! calibration; routing thresholds can be overridden from configuration.

use crate::domain::ast::Script;
use serde::Serialize;
use std::fmt;

pub const MECHANICAL_THRESHOLD: f64 = 0.3;
pub const FALLBACK_THRESHOLD: f64 = 0.7;

struct Factor {
    name: &'static str,
    normalizer: f64,
    weight: f64,
}

const FACTORS: [Factor; 8] = [
    Factor { name: "lines", normalizer: 150.0, weight: 0.25 },
    Factor { name: "functions", normalizer: 3.0, weight: 0.20 },
    Factor { name: "custom_types", normalizer: 2.0, weight: 0.15 },
    Factor { name: "array_matrix", normalizer: 8.0, weight: 0.10 },
    Factor { name: "drawing", normalizer: 3.0, weight: 0.05 },
    Factor { name: "nesting", normalizer: 3.0, weight: 0.10 },
    Factor { name: "indicators", normalizer: 8.0, weight: 0.10 },
    Factor { name: "variables", normalizer: 20.0, weight: 0.05 },
];

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ComplexityFactors {
    pub lines: f64,
    pub functions: f64,
    pub custom_types: f64,
    pub array_matrix: f64,
    pub drawing: f64,
    pub nesting: f64,
    pub indicators: f64,
    pub variables: f64,
}

impl ComplexityFactors {
    fn from_counts(counts: [usize; 8]) -> Self {
        let f = |i: usize| (counts[i] as f64 / FACTORS[i].normalizer).min(1.0);
        Self {
            lines: f(0),
            functions: f(1),
            custom_types: f(2),
            array_matrix: f(3),
            drawing: f(4),
            nesting: f(5),
            indicators: f(6),
            variables: f(7),
        }
    }

    fn values(&self) -> [f64; 8] {
        [
            self.lines,
            self.functions,
            self.custom_types,
            self.array_matrix,
            self.drawing,
            self.nesting,
            self.indicators,
            self.variables,
        ]
    }

    /// Factor names paired with their normalized values.
    pub fn named(&self) -> Vec<(&'static str, f64)> {
        FACTORS
            .iter()
            .zip(self.values())
            .map(|(factor, v)| (factor.name, v))
            .collect()
    }

    pub fn score(&self) -> f64 {
        FACTORS
            .iter()
            .zip(self.values())
            .map(|(factor, v)| factor.weight * v)
            .sum()
    }
}

pub fn calculate_complexity(script: &Script) -> (f64, ComplexityFactors) {
    let counts = [
        script.code_lines(),
        script.functions().len(),
        script.type_decls().len(),
        script.collection_ops().len(),
        script.drawing_calls().len(),
        script.max_nesting_depth(),
        script.indicators_used().len(),
        script.variables().len(),
    ];
    let factors = ComplexityFactors::from_counts(counts);
    (factors.score(), factors)
}

/// Routing thresholds for the conversion path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Thresholds {
    pub mechanical: f64,
    pub fallback: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            mechanical: MECHANICAL_THRESHOLD,
            fallback: FALLBACK_THRESHOLD,
        }
    }
}

/// Conversion path a caller should take for a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Route {
    /// Rule-based conversion is attempted.
    Mechanical,
    /// Try mechanical conversion, fall back on rejection.
    Hybrid,
    /// Go straight to the fallback converter.
    Fallback,
}

impl Route {
    pub fn classify(score: f64, thresholds: &Thresholds) -> Route {
        if score < thresholds.mechanical {
            Route::Mechanical
        } else if score <= thresholds.fallback {
            Route::Hybrid
        } else {
            Route::Fallback
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::Mechanical => write!(f, "mechanical"),
            Route::Hybrid => write!(f, "hybrid"),
            Route::Fallback => write!(f, "fallback"),
        }
    }
}
