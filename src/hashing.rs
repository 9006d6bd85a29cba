//! Deterministic hashing and bucketing.
//!
//! Everything in this module must produce bit-identical results across all SDK implementations:
//! the same user hashed on a different platform has to land in the same bucket.
use crate::models::{BucketRange, Namespace};

const FNV_32_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_32_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a over UTF-16 code units of `input`.
///
/// Hashing code units (rather than UTF-8 bytes) keeps results identical to JavaScript
/// implementations for non-ASCII input.
fn fnv1a32(input: &str) -> u32 {
    input.encode_utf16().fold(FNV_32_OFFSET_BASIS, |hash, unit| {
        (hash ^ u32::from(unit)).wrapping_mul(FNV_32_PRIME)
    })
}

/// Hash `value` with `seed` into the `[0, 1)` range.
///
/// - Version 1: `fnv1a32(value + seed) % 1000 / 1000`. Slightly biased, kept for backward
///   compatibility.
/// - Version 2: `fnv1a32(fnv1a32(seed + value).to_string()) % 10000 / 10000`.
///
/// Returns `None` for an unknown hash version.
pub fn hash(seed: &str, value: &str, version: i32) -> Option<f64> {
    match version {
        1 => {
            let n = fnv1a32(&format!("{value}{seed}"));
            Some(f64::from(n % 1000) / 1000.0)
        }
        2 => {
            let n = fnv1a32(&fnv1a32(&format!("{seed}{value}")).to_string());
            Some(f64::from(n % 10000) / 10000.0)
        }
        _ => None,
    }
}

/// Returns `n` equal weights summing to 1. Returns an empty list for `n == 0`.
pub fn get_equal_weights(n: usize) -> Vec<f64> {
    if n == 0 {
        return Vec::new();
    }
    vec![1.0 / n as f64; n]
}

/// Convert variation weights and coverage into bucket ranges.
///
/// `coverage` is clamped to `[0, 1]`. Weights are replaced with equal weights if their count
/// differs from `num_variations` or their sum is outside `[0.99, 1.01]`.
///
/// Each range starts where the previous *unscaled* weight ended and is `coverage * weight` wide,
/// so changing coverage only moves the right edges and never reshuffles already-bucketed users.
pub fn get_bucket_ranges(
    num_variations: usize,
    coverage: f64,
    weights: Option<&[f64]>,
) -> Vec<BucketRange> {
    let coverage = if coverage.is_nan() {
        1.0
    } else {
        coverage.clamp(0.0, 1.0)
    };

    let weights = match weights {
        Some(weights) if weights.len() == num_variations => {
            let total: f64 = weights.iter().sum();
            if (0.99..=1.01).contains(&total) {
                weights.to_vec()
            } else {
                log::debug!(target: "growthbook", total; "variation weights do not add up to 1, using equal weights");
                get_equal_weights(num_variations)
            }
        }
        Some(weights) => {
            log::debug!(target: "growthbook",
                        num_weights = weights.len(),
                        num_variations;
                        "number of weights does not match number of variations, using equal weights");
            get_equal_weights(num_variations)
        }
        None => get_equal_weights(num_variations),
    };

    let mut cumulative = 0.0;
    weights
        .into_iter()
        .map(|weight| {
            let start = cumulative;
            cumulative += weight;
            BucketRange {
                start: round4(start),
                end: round4(start + coverage * weight),
            }
        })
        .collect()
}

fn round4(n: f64) -> f64 {
    (n * 10000.0).round() / 10000.0
}

/// Returns the index of the first range containing `n`, or `None` if no range does.
pub fn choose_variation(n: f64, ranges: &[BucketRange]) -> Option<usize> {
    ranges.iter().position(|range| range.contains(n))
}

/// Returns `true` if `user_id` falls into the namespace's slice of the hash space.
pub fn in_namespace(user_id: &str, namespace: &Namespace) -> bool {
    let Some(n) = hash(&format!("__{}", namespace.id), user_id, 1) else {
        return false;
    };
    n >= namespace.start && n < namespace.end
}

/// Normalize a version string so that plain string comparison orders versions correctly.
///
/// A leading `v` and any build metadata (`+...`) are dropped. The version is split on `.` and
/// `-`, numeric parts are left-padded with spaces to width 5, and a `~` part is appended to
/// versions without a prerelease tag so they sort after all of their prereleases.
///
/// ```
/// # use growthbook_core::hashing::padded_version_string;
/// assert_eq!(
///     padded_version_string("v1.2.3-rc.1+build123"),
///     "    1-    2-    3-rc-    1"
/// );
/// assert!(padded_version_string("1.2.3") < padded_version_string("1.10.0"));
/// ```
pub fn padded_version_string(input: &str) -> String {
    let input = input.strip_prefix('v').unwrap_or(input);
    let input = input.split_once('+').map_or(input, |(version, _build)| version);

    let mut parts: Vec<&str> = input.split(['.', '-']).collect();
    if parts.len() == 3 {
        parts.push("~");
    }

    parts
        .into_iter()
        .map(|part| {
            if !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()) {
                format!("{part:>5}")
            } else {
                part.to_owned()
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}
