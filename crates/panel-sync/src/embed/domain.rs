//! Widget domains and their cross product.

use serde_json::{json, Value};

use crate::component::{DomainSource, RangeSpec, Step};

/// The ordered values a widget is driven through during export.
///
/// Ranges are sampled with at most `max_opts` points.
pub fn resolve_domain(source: &DomainSource, max_opts: usize) -> Vec<Value> {
    match source {
        DomainSource::Enumerated(values) => values.clone(),
        DomainSource::Range(range) => sample_range(range, max_opts),
    }
}

/// Evenly spaced samples over `[start, end]`, widening the step when the
/// native step would produce more than `max_opts` points.
pub fn sample_range(range: &RangeSpec, max_opts: usize) -> Vec<Value> {
    let RangeSpec { start, end, step } = *range;
    let span = end - start;
    if max_opts <= 1 || span <= 0.0 {
        return vec![number(start, step)];
    }
    let intervals = (max_opts - 1) as f64;

    match step {
        Step::Int(step) => {
            let mut step = step.max(1);
            if span / step as f64 > intervals {
                step = (span / intervals).ceil() as i64;
            }
            let (start, end) = (start as i64, end as i64);
            (start..=end)
                .step_by(step as usize)
                .map(|v| json!(v))
                .collect()
        }
        Step::Float(step) => {
            let mut step = if step > 0.0 { step } else { span };
            if span / step > intervals {
                step = span / intervals;
            }
            let tolerance = step * 1e-9;
            let mut values = Vec::new();
            for i in 0.. {
                let value = start + i as f64 * step;
                if value > end + tolerance {
                    break;
                }
                values.push(json!(value.min(end)));
            }
            values
        }
    }
}

fn number(value: f64, step: Step) -> Value {
    match step {
        Step::Int(_) => json!(value as i64),
        Step::Float(_) => json!(value),
    }
}

/// Number of combinations, saturating at `usize::MAX`.
pub fn cardinality(domains: &[Vec<Value>]) -> usize {
    domains
        .iter()
        .try_fold(1usize, |acc, domain| acc.checked_mul(domain.len()))
        .unwrap_or(usize::MAX)
}

/// Cross product of the domains, each iterated last value first, with the
/// first domain varying slowest.
///
/// Client-side lookup keys are built in this order, so the order is part of
/// the export format.
pub fn cross_product(domains: &[Vec<Value>]) -> Vec<Vec<Value>> {
    domains.iter().fold(vec![Vec::new()], |combinations, domain| {
        combinations
            .into_iter()
            .flat_map(|prefix| {
                domain.iter().rev().map(move |value| {
                    let mut combination = prefix.clone();
                    combination.push(value.clone());
                    combination
                })
            })
            .collect()
    })
}
