//! Adaptive Best-Of Timing
//!
//! Estimates the best-case per-call time of a unit of work. When the
//! caller fixes neither an iteration count nor a repeat count, the engine
//! discovers an iteration count that fills a target measurement duration,
//! then splits it into several repeated timed loops and reports the
//! minimum.

use std::time::{Duration, Instant};

/// Target duration one timed loop should fill during discovery.
pub const DEFAULT_TARGET_DURATION: Duration = Duration::from_millis(100);

/// Cap on discovery probes. With the adaptive jump below, convergence
/// takes a handful of rounds; this only guards against a pathological
/// clock.
const MAX_PROBE_ROUNDS: usize = 200;

/// Unit a reported per-call time is scaled to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    /// Seconds (scale 1)
    Seconds,
    /// Milliseconds (scale 1e3)
    Millis,
    /// Microseconds (scale 1e6)
    Micros,
    /// Nanoseconds (scale 1e9)
    Nanos,
}

impl TimeUnit {
    /// Multiplier that converts seconds into this unit.
    pub fn scale(self) -> f64 {
        match self {
            TimeUnit::Seconds => 1.0,
            TimeUnit::Millis => 1e3,
            TimeUnit::Micros => 1e6,
            TimeUnit::Nanos => 1e9,
        }
    }

    /// Conventional suffix ("s", "ms", "us", "ns").
    pub fn suffix(self) -> &'static str {
        match self {
            TimeUnit::Seconds => "s",
            TimeUnit::Millis => "ms",
            TimeUnit::Micros => "us",
            TimeUnit::Nanos => "ns",
        }
    }

    /// Inverse of [`TimeUnit::suffix`].
    pub fn from_suffix(s: &str) -> Option<Self> {
        match s {
            "s" => Some(TimeUnit::Seconds),
            "ms" => Some(TimeUnit::Millis),
            "us" => Some(TimeUnit::Micros),
            "ns" => Some(TimeUnit::Nanos),
            _ => None,
        }
    }
}

impl std::fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.suffix())
    }
}

/// Result of one timing run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timing {
    /// Iterations per timed loop.
    pub loops: u64,
    /// Number of independent timed loops; the best one wins.
    pub repeat: u64,
    /// Best per-call time, scaled to `units`.
    pub timing: f64,
    /// Unit `timing` is expressed in.
    pub units: TimeUnit,
}

impl Timing {
    /// Best per-call time in seconds, regardless of the reporting unit.
    pub fn seconds(&self) -> f64 {
        self.timing / self.units.scale()
    }
}

/// Caller-controlled knobs for [`measure`].
#[derive(Debug, Clone)]
pub struct TimingOptions {
    /// Fixed iterations per loop. `None` = discover adaptively.
    pub ncalls: Option<u64>,
    /// Fixed repeat count. `None` = derive from the iteration count.
    pub repeat: Option<u64>,
    /// Duration one timed loop should aim for during discovery.
    pub target_duration: Duration,
    /// Always report in milliseconds instead of picking a human-scale unit.
    pub force_millis: bool,
}

impl Default for TimingOptions {
    fn default() -> Self {
        Self {
            ncalls: None,
            repeat: None,
            target_duration: DEFAULT_TARGET_DURATION,
            force_millis: false,
        }
    }
}

/// Time `n` calls of `f` and return the elapsed wall-clock seconds.
fn time_loop<F, E>(f: &mut F, n: u64) -> Result<f64, E>
where
    F: FnMut() -> Result<(), E>,
{
    let start = Instant::now();
    for _ in 0..n {
        f()?;
    }
    Ok(start.elapsed().as_secs_f64())
}

/// Estimate the best-case per-call time of `call`.
///
/// When either the iteration count or the repeat count is unspecified,
/// an iteration count is first discovered by probing: starting from one
/// call (or the fixed count), each probe multiplies the count by
/// `2^max(1, floor(log2(target/elapsed)))` - a single adaptive jump
/// toward the target duration rather than naive doubling. The probe
/// stops as soon as it reaches, or is projected to reach, the target.
///
/// Any still-unspecified repeat count is then derived:
/// - both unspecified: `repeat = max(3, floor(sqrt(n)))`, iterations are
///   divided by the repeat count so the total stays near the target
/// - only repeat unspecified: `repeat = max(1, n / ncalls)`
/// - only iterations unspecified: `iterations = max(1, n / repeat)`
///
/// The result is `min(loop totals) / iterations`. Errors from `call` are
/// surfaced immediately and never retried.
pub fn measure<F, E>(mut call: F, opts: &TimingOptions) -> Result<Timing, E>
where
    F: FnMut() -> Result<(), E>,
{
    let target = opts.target_duration.as_secs_f64();
    let mut number = opts.ncalls.unwrap_or(1).max(1);

    if opts.ncalls.is_none() || opts.repeat.is_none() {
        for _ in 1..MAX_PROBE_ROUNDS {
            let timed = time_loop(&mut call, number)?;
            if timed >= target {
                break;
            }
            let exp = if timed > 0.0 {
                (target / timed).log2().floor() as i64
            } else {
                1
            };
            let mult = 1u64 << exp.clamp(1, 30);
            number = number.saturating_mul(mult);
            if timed * mult as f64 >= target {
                // projected to land at or past the target; one more probe
                // would only burn cycles without measuring anything
                break;
            }
        }
    }

    let (loops, repeat) = match (opts.ncalls, opts.repeat) {
        (None, None) => {
            let r = ((number as f64).sqrt().floor() as u64).max(3);
            ((number / r).max(1), r)
        }
        (Some(ncalls), None) => (ncalls.max(1), (number / ncalls.max(1)).max(1)),
        (None, Some(r)) => ((number / r.max(1)).max(1), r.max(1)),
        (Some(ncalls), Some(r)) => (ncalls.max(1), r.max(1)),
    };

    let mut best = f64::INFINITY;
    for _ in 0..repeat {
        let total = time_loop(&mut call, loops)?;
        if total < best {
            best = total;
        }
    }
    let best = best / loops as f64;

    let units = if opts.force_millis {
        TimeUnit::Millis
    } else {
        natural_unit(best)
    };

    Ok(Timing {
        loops,
        repeat,
        timing: best * units.scale(),
        units,
    })
}

/// Pick the unit that keeps the reported magnitude human-scale.
fn natural_unit(best: f64) -> TimeUnit {
    if best > 0.0 && best < 1000.0 {
        // floored division keeps sub-second values in the right bucket:
        // 4e-3 s -> ms, 2e-5 s -> us, 2e-7 s -> ns
        let order = -(best.log10().floor() as i64).div_euclid(3);
        match order.clamp(0, 3) {
            0 => TimeUnit::Seconds,
            1 => TimeUnit::Millis,
            2 => TimeUnit::Micros,
            _ => TimeUnit::Nanos,
        }
    } else if best >= 1000.0 {
        TimeUnit::Seconds
    } else {
        TimeUnit::Nanos
    }
}
