//! Streaming statistics over extracted bands.

use raster_common::Bounds;

/// Summary statistics for one extracted timestamp. All-null fields mean
/// the computation failed or the band held no valid pixels; downstream
/// consumers fall back to configured or per-window ranges.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableStats {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub std_dev: Option<f64>,
    pub valid_count: u64,
    pub total_count: u64,
    pub bounds: Option<Bounds>,
}

impl VariableStats {
    /// The failure value: nothing known about the band.
    pub fn null() -> Self {
        Self {
            min: None,
            max: None,
            mean: None,
            std_dev: None,
            valid_count: 0,
            total_count: 0,
            bounds: None,
        }
    }

    pub fn is_null(&self) -> bool {
        self.min.is_none() && self.max.is_none() && self.valid_count == 0
    }
}

/// Welford accumulator; NaN values count toward the total but not the
/// moments.
#[derive(Debug, Clone)]
pub struct StatsAccumulator {
    count: u64,
    total: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl StatsAccumulator {
    pub fn new() -> Self {
        Self {
            count: 0,
            total: 0,
            mean: 0.0,
            m2: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    pub fn push(&mut self, value: f32) {
        self.total += 1;
        if value.is_nan() {
            return;
        }
        let value = value as f64;
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    pub fn extend(&mut self, values: &[f32]) {
        for &v in values {
            self.push(v);
        }
    }

    pub fn finish(self) -> VariableStats {
        if self.count == 0 {
            return VariableStats {
                total_count: self.total,
                ..VariableStats::null()
            };
        }
        VariableStats {
            min: Some(self.min),
            max: Some(self.max),
            mean: Some(self.mean),
            std_dev: Some((self.m2 / self.count as f64).sqrt()),
            valid_count: self.count,
            total_count: self.total,
            bounds: None,
        }
    }
}

impl Default for StatsAccumulator {
    fn default() -> Self {
        Self::new()
    }
}
