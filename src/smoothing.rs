// Tweening (blend toward a new sample) and interpolation (synthesize a filler sample).

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::models::Sample;

const PERCENT_MIN: f64 = 0.0;
const PERCENT_MAX: f64 = 100.0;

/// Blend `next` toward `current` by `factor` (0 = keep `current`, 1 = take `next`).
///
/// Numeric fields present on both samples are blended; counters are rounded.
/// Fields only `next` carries, and the container breakdown, come from `next`
/// verbatim. The result always carries `next`'s timestamp.
pub fn tween(next: &Sample, current: &Sample, factor: f64) -> Sample {
    let factor = if factor.is_nan() {
        1.0
    } else {
        factor.clamp(0.0, 1.0)
    };
    Sample {
        timestamp: next.timestamp,
        cpu_percent: lerp(current.cpu_percent, next.cpu_percent, factor),
        memory_percent: lerp(current.memory_percent, next.memory_percent, factor),
        disk_percent: match (current.disk_percent, next.disk_percent) {
            (Some(c), Some(n)) => Some(lerp(c, n, factor)),
            (_, n) => n,
        },
        network_bytes_sent: lerp_counter(current.network_bytes_sent, next.network_bytes_sent, factor),
        network_bytes_recv: lerp_counter(current.network_bytes_recv, next.network_bytes_recv, factor),
        containers: next.containers.clone(),
    }
}

// Weighted form so factor 1 yields `next` and factor 0 yields `current` exactly.
fn lerp(current: f64, next: f64, factor: f64) -> f64 {
    next * factor + current * (1.0 - factor)
}

fn lerp_counter(current: Option<u64>, next: Option<u64>, factor: f64) -> Option<u64> {
    match (current, next) {
        (Some(c), Some(n)) => Some(lerp(c as f64, n as f64, factor).round().max(0.0) as u64),
        (_, n) => n,
    }
}

/// Synthesize a plausible next sample from `last` for display between real updates.
///
/// Each percentage field moves by at most `jitter_fraction` of its value and is
/// clamped to [0, 100]. Counters and the container breakdown pass through.
pub fn interpolate<R: Rng>(
    last: &Sample,
    jitter_fraction: f64,
    now: DateTime<Utc>,
    rng: &mut R,
) -> Sample {
    let jitter = jitter_fraction.abs();
    Sample {
        timestamp: now,
        cpu_percent: perturb_percent(last.cpu_percent, jitter, rng),
        memory_percent: perturb_percent(last.memory_percent, jitter, rng),
        disk_percent: last.disk_percent.map(|d| perturb_percent(d, jitter, rng)),
        network_bytes_sent: last.network_bytes_sent,
        network_bytes_recv: last.network_bytes_recv,
        containers: last.containers.clone(),
    }
}

fn perturb_percent<R: Rng>(value: f64, jitter: f64, rng: &mut R) -> f64 {
    if !value.is_finite() {
        return PERCENT_MIN;
    }
    let spread = value.abs() * jitter;
    let delta = if spread > 0.0 {
        rng.gen_range(-spread..=spread)
    } else {
        0.0
    };
    (value + delta).clamp(PERCENT_MIN, PERCENT_MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContainerState, ContainerUsage};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn full(secs: i64, cpu: f64, mem: f64, disk: f64, sent: u64) -> Sample {
        Sample {
            disk_percent: Some(disk),
            network_bytes_sent: Some(sent),
            network_bytes_recv: Some(sent * 2),
            ..Sample::new(at(secs), cpu, mem)
        }
    }

    #[test]
    fn tween_factor_one_takes_next() {
        let current = full(0, 10.0, 20.0, 30.0, 100);
        let next = full(1, 50.0, 60.0, 70.0, 300);
        assert_eq!(tween(&next, &current, 1.0), next);
    }

    #[test]
    fn tween_factor_one_is_exact_for_fractional_values() {
        let current = Sample::new(at(0), 99.9, 100.0);
        let next = Sample::new(at(1), 0.1, 1e-17);
        assert_eq!(tween(&next, &current, 1.0), next);
        let back = tween(&next, &current, 0.0);
        assert_eq!(back.cpu_percent, 99.9);
        assert_eq!(back.memory_percent, 100.0);
    }

    #[test]
    fn tween_factor_zero_keeps_current_values_with_next_timestamp() {
        let current = full(0, 10.0, 20.0, 30.0, 100);
        let next = full(1, 50.0, 60.0, 70.0, 300);
        let out = tween(&next, &current, 0.0);
        assert_eq!(out.timestamp, next.timestamp);
        assert_eq!(out.cpu_percent, 10.0);
        assert_eq!(out.memory_percent, 20.0);
        assert_eq!(out.disk_percent, Some(30.0));
        assert_eq!(out.network_bytes_sent, Some(100));
        assert_eq!(out.network_bytes_recv, Some(200));
    }

    #[test]
    fn tween_halfway_blends_and_rounds_counters() {
        let current = full(0, 10.0, 20.0, 30.0, 101);
        let next = full(1, 50.0, 60.0, 70.0, 300);
        let out = tween(&next, &current, 0.5);
        assert_eq!(out.cpu_percent, 30.0);
        assert_eq!(out.memory_percent, 40.0);
        assert_eq!(out.disk_percent, Some(50.0));
        assert_eq!(out.network_bytes_sent, Some(201));
    }

    #[test]
    fn tween_takes_fields_only_next_has() {
        let current = Sample::new(at(0), 10.0, 20.0);
        let mut next = full(1, 50.0, 60.0, 70.0, 300);
        next.containers = Some(vec![ContainerUsage {
            id: "abc".into(),
            name: "web".into(),
            stack: Some("media".into()),
            cpu_percent: 3.0,
            memory_percent: 4.0,
            memory_usage_bytes: 1024,
            state: ContainerState::Running,
        }]);
        let out = tween(&next, &current, 0.25);
        assert_eq!(out.disk_percent, Some(70.0));
        assert_eq!(out.network_bytes_sent, Some(300));
        assert_eq!(out.containers, next.containers);
    }

    #[test]
    fn interpolate_stays_in_domain_and_near_last() {
        let mut rng = StdRng::seed_from_u64(7);
        for base in [0.0, 0.5, 25.0, 50.0, 99.9, 100.0] {
            let last = full(0, base, base, base, 42);
            for _ in 0..200 {
                let out = interpolate(&last, 0.02, at(5), &mut rng);
                for v in [out.cpu_percent, out.memory_percent, out.disk_percent.unwrap()] {
                    assert!((0.0..=100.0).contains(&v), "{} out of range", v);
                    assert!((v - base).abs() <= base * 0.02 + 1e-9);
                }
                assert_eq!(out.network_bytes_sent, Some(42));
                assert_eq!(out.timestamp, at(5));
            }
        }
    }

    #[test]
    fn interpolate_does_not_touch_last() {
        let mut rng = StdRng::seed_from_u64(1);
        let last = full(0, 40.0, 40.0, 40.0, 1);
        let copy = last.clone();
        let _ = interpolate(&last, 0.5, at(1), &mut rng);
        assert_eq!(last, copy);
    }
}
