//! Histogram bucket selection by metric name pattern

use std::collections::BTreeMap;

/// Millisecond-scale buckets used for histograms without a matching pattern
pub const DEFAULT_HISTOGRAM_BUCKETS: [f64; 18] = [
    1.0, 5.0, 30.0, 50.0, 100.0, 200.0, 300.0, 500.0, 700.0, 1000.0, 1500.0, 2000.0, 2500.0,
    3000.0, 5000.0, 7000.0, 9000.0, 10000.0,
];

/// Nanosecond-scale buckets (1ns to 10s) for `*_ns` histograms
pub const NANOSECOND_HISTOGRAM_BUCKETS: [f64; 24] = [
    1.0,
    10.0,
    100.0,
    1_000.0,
    10_000.0,
    100_000.0,
    1_000_000.0,
    5_000_000.0,
    30_000_000.0,
    50_000_000.0,
    100_000_000.0,
    200_000_000.0,
    300_000_000.0,
    500_000_000.0,
    700_000_000.0,
    1_000_000_000.0,
    1_500_000_000.0,
    2_000_000_000.0,
    2_500_000_000.0,
    3_000_000_000.0,
    5_000_000_000.0,
    7_000_000_000.0,
    9_000_000_000.0,
    10_000_000_000.0,
];

/// Histogram bucket configuration
///
/// Patterns use `*` as a wildcard for any run of characters. When several
/// patterns match a name, the lexicographically first pattern wins.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsConfig {
    pub default_histogram_buckets: Vec<f64>,
    pub histogram_buckets_by_name: BTreeMap<String, Vec<f64>>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        let mut by_name = BTreeMap::new();
        by_name.insert("*_ns".to_string(), NANOSECOND_HISTOGRAM_BUCKETS.to_vec());

        Self {
            default_histogram_buckets: DEFAULT_HISTOGRAM_BUCKETS.to_vec(),
            histogram_buckets_by_name: by_name,
        }
    }
}

impl MetricsConfig {
    /// Buckets for a histogram with the given name
    pub fn buckets_for(&self, metric_name: &str) -> Vec<f64> {
        self.histogram_buckets_by_name
            .iter()
            .find(|(pattern, _)| glob_match(pattern, metric_name))
            .map(|(_, buckets)| buckets.clone())
            .unwrap_or_else(|| self.default_histogram_buckets.clone())
    }
}

/// Match `name` against a pattern where `*` matches any (possibly empty) substring
fn glob_match(pattern: &str, name: &str) -> bool {
    let mut parts = pattern.split('*');
    let Some(first) = parts.next() else {
        return name.is_empty();
    };
    let Some(mut rest) = name.strip_prefix(first) else {
        return false;
    };

    let segments: Vec<&str> = parts.collect();
    let Some((last, middle)) = segments.split_last() else {
        // No wildcard at all: exact match
        return rest.is_empty();
    };

    for segment in middle {
        match rest.find(segment) {
            Some(idx) => rest = &rest[idx + segment.len()..],
            None => return false,
        }
    }

    rest.ends_with(last)
}
