use std::time::Duration;

/// The delay slept after the first failure of a connection that had been healthy.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(1);

/// The multiple of the previous delay used for each subsequent delay.
pub const DEFAULT_FACTOR: f64 = 1.5;

/// The ceiling on any delay produced by the default [`Backoff`].
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(15);

/// A description of a backoff strategy with an initial delay, an exponential factor, a maximum
/// delay, and optional random jitter.
///
/// A [`Backoff`] is stateless: whoever is retrying owns the current delay and asks [`next`] for the
/// one after it. With the [`Default`] parameters, the sequence of delays (in seconds, rounded off)
/// is `[1, 1.5, 2.3, 3.4, 5.1, 7.6, 11.4, 15, 15, 15, ...]`.
///
/// [`next`]: Backoff::next
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default, deny_unknown_fields)
)]
pub struct Backoff {
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    initial_delay: Duration,
    factor: f64,
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    max_delay: Duration,
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    jitter: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff {
            initial_delay: DEFAULT_INITIAL_DELAY,
            factor: DEFAULT_FACTOR,
            max_delay: DEFAULT_MAX_DELAY,
            jitter: Duration::from_millis(0),
        }
    }
}

impl Backoff {
    /// Create a simple [`Backoff`] which delays by `initial_delay` each time it is invoked,
    /// forever.
    pub fn with_delay(initial_delay: Duration) -> Self {
        Backoff {
            initial_delay,
            factor: 1.0,
            max_delay: initial_delay.max(DEFAULT_MAX_DELAY),
            jitter: Duration::from_millis(0),
        }
    }

    /// Add an exponential factor to a [`Backoff`], so that every time it is invoked, it delays for
    /// that multiple of its previous delay time.
    pub fn exponential(mut self, factor: f64) -> Self {
        self.factor = factor;
        self
    }

    /// Add random jitter to a [`Backoff`], so that [`jittered`](Backoff::jittered) adds or
    /// subtracts a random duration within the range specified.
    pub fn jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Cap the maximum delay of a [`Backoff`] so that it will delay by at most `max_delay`, if
    /// otherwise it would delay more.
    pub fn max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// The delay to start from, and to return to after a successful reconnection.
    pub fn initial(&self) -> Duration {
        self.initial_delay
    }

    /// The largest delay this [`Backoff`] will ever produce from [`next`](Backoff::next).
    pub fn cap(&self) -> Duration {
        self.max_delay
    }

    /// Compute the delay which follows `current`: `min(current * factor, max_delay)`.
    ///
    /// A zero `current`, or a product which is not a positive, representable duration, yields the
    /// maximum delay, so that a retry loop driven by this function can never spin without pause.
    pub fn next(&self, current: Duration) -> Duration {
        if current == Duration::from_millis(0) {
            return self.max_delay;
        }
        let scaled = current.as_secs_f64() * self.factor;
        // Also catches NaN
        if !(scaled > 0.0) {
            return self.max_delay;
        }
        match Duration::try_from_secs_f64(scaled) {
            Ok(delay) => delay.min(self.max_delay),
            Err(_) => self.max_delay,
        }
    }

    /// Perturb `delay` by a random amount of at most the configured jitter, in either direction.
    pub fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter == Duration::from_millis(0) {
            return delay;
        }
        let random_jitter = self.jitter.mul_f64(rand::random());
        if rand::random() {
            delay + random_jitter
        } else {
            delay - random_jitter.min(delay)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    #[test]
    fn default_sequence_converges_to_cap() {
        let backoff = Backoff::default();
        let mut delay = backoff.initial();
        let mut seen = vec![delay];
        for _ in 0..9 {
            delay = backoff.next(delay);
            seen.push(delay);
        }
        assert_eq!(
            seen,
            vec![
                secs(1.0),
                secs(1.5),
                secs(2.25),
                secs(3.375),
                secs(5.0625),
                secs(7.59375),
                secs(11.390625),
                secs(15.0),
                secs(15.0),
                secs(15.0),
            ]
        );
    }

    #[test]
    fn cap_is_a_fixed_point() {
        let backoff = Backoff::default();
        assert_eq!(backoff.next(DEFAULT_MAX_DELAY), DEFAULT_MAX_DELAY);
        assert_eq!(backoff.next(Duration::from_secs(600)), DEFAULT_MAX_DELAY);
    }

    #[test]
    fn monotone_non_decreasing() {
        let backoff = Backoff::default();
        let mut delay = Duration::from_millis(1);
        for _ in 0..100 {
            let next = backoff.next(delay);
            assert!(next >= delay);
            delay = next;
        }
        assert_eq!(delay, DEFAULT_MAX_DELAY);
    }

    #[test]
    fn zero_delay_never_spins() {
        let backoff = Backoff::default();
        assert_eq!(backoff.next(Duration::from_millis(0)), DEFAULT_MAX_DELAY);
    }

    #[test]
    fn overflow_and_nonsense_factors_yield_cap() {
        let huge = Backoff::default()
            .exponential(f64::MAX)
            .max_delay(Duration::from_secs(3));
        assert_eq!(huge.next(Duration::from_secs(u64::MAX)), Duration::from_secs(3));

        let negative = Backoff::default().exponential(-2.0);
        assert_eq!(negative.next(Duration::from_secs(1)), DEFAULT_MAX_DELAY);

        let nan = Backoff::default().exponential(f64::NAN);
        assert_eq!(nan.next(Duration::from_secs(1)), DEFAULT_MAX_DELAY);
    }

    #[test]
    fn constant_delay() {
        let backoff = Backoff::with_delay(Duration::from_millis(250));
        assert_eq!(
            backoff.next(Duration::from_millis(250)),
            Duration::from_millis(250)
        );
    }

    #[test]
    fn jitter_stays_in_range() {
        let backoff = Backoff::default().jitter(Duration::from_millis(100));
        for _ in 0..1000 {
            let delay = backoff.jittered(Duration::from_secs(1));
            assert!(delay >= Duration::from_millis(900));
            assert!(delay <= Duration::from_millis(1100));
        }
        assert_eq!(
            Backoff::default().jittered(Duration::from_secs(1)),
            Duration::from_secs(1)
        );
    }
}
