use rand::Rng;
use std::thread;
use std::time::Duration;

/// `base` with +/-`ratio` uniform random jitter, never below 1ms.
pub fn jittered(base: Duration, ratio: f64) -> Duration {
    let secs = base.as_secs_f64();
    let jitter = secs * ratio.clamp(0.0, 1.0);
    let actual = if jitter > 0.0 {
        secs + rand::thread_rng().gen_range(-jitter..jitter)
    } else {
        secs
    };
    Duration::from_secs_f64(actual.max(0.001))
}

/// Sleep for `base` with +/-30% jitter. Used between synthetic input events.
pub fn sleep_jitter(base: Duration) {
    thread::sleep(jittered(base, 0.3));
}

/// Sleep for exact milliseconds (no jitter).
pub fn sleep_ms(ms: u64) {
    thread::sleep(Duration::from_millis(ms));
}
