use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock instant captured as whole seconds plus microseconds since the
/// Unix epoch, mirroring a `timeval`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timestamp {
    pub secs: i64,
    pub micros: i64,
}

impl Timestamp {
    pub fn now() -> Timestamp {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();

        Timestamp {
            secs: since_epoch.as_secs() as i64,
            micros: i64::from(since_epoch.subsec_micros()),
        }
    }
}

/// Elapsed time between two timestamps. The microsecond component is always
/// in `[0, 1_000_000)`; the seconds component goes negative if the clock
/// stepped backwards between the captures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RttSample {
    pub secs: i64,
    pub micros: i64,
}

impl RttSample {
    pub fn as_micros(&self) -> f64 {
        self.secs as f64 * 1_000_000.0 + self.micros as f64
    }

    pub fn as_millis(&self) -> f64 {
        self.as_micros() / 1000.0
    }
}

/// Subtract `send` from `recv`, borrowing whole seconds while the raw
/// microsecond difference is negative.
pub fn elapsed(send: Timestamp, recv: Timestamp) -> RttSample {
    let mut secs = recv.secs - send.secs;
    let mut micros = recv.micros - send.micros;

    while micros < 0 {
        micros += 1_000_000;
        secs -= 1;
    }

    RttSample { secs, micros }
}
