/// Repository lookup key.
///
/// This is a time of week in whole seconds, obtained by rounding the
/// timestamp of the data.
pub type TimeKey = i64;

/// Timestamp.
///
/// A timestamp split into whole seconds and a nanoseconds fraction, as
/// reported in the validity time of a record header.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd, Default)]
pub struct Timestamp {
    /// Whole seconds.
    pub sec: i64,
    /// Fractional part of the timestamp, in nanoseconds.
    pub nanoseconds: i64,
}

impl Timestamp {
    /// Constructs a new timestamp.
    pub fn new(sec: i64, nanoseconds: i64) -> Self {
        Timestamp { sec, nanoseconds }
    }

    /// Returns the timestamp as floating point seconds.
    ///
    /// # Examples
    /// ```
    /// use pnt_integrity::Timestamp;
    ///
    /// let t = Timestamp::new(100, 250_000_000);
    /// assert_eq!(t.as_seconds(), 100.25);
    /// ```
    pub fn as_seconds(&self) -> f64 {
        self.sec as f64 + self.nanoseconds as f64 / 1e9
    }

    /// Returns the repository key for this timestamp.
    ///
    /// See [`time_of_week_key`].
    pub fn key(&self) -> TimeKey {
        time_of_week_key(self.sec, self.nanoseconds)
    }
}

/// Computes the repository key for a timestamp.
///
/// The key is `round(sec + nanoseconds / 1e9)`. The sum is formed in floating
/// point before rounding, so a producer that stores data under a key computed
/// differently (for instance by truncation) will not find a match here.
///
/// # Examples
/// ```
/// use pnt_integrity::time_of_week_key;
///
/// assert_eq!(time_of_week_key(100, 499_999_999), 100);
/// assert_eq!(time_of_week_key(100, 500_000_000), 101);
/// ```
pub fn time_of_week_key(sec: i64, nanoseconds: i64) -> TimeKey {
    seconds_to_key(sec as f64 + nanoseconds as f64 / 1e9)
}

/// Rounds floating point seconds to a repository key.
pub fn seconds_to_key(seconds: f64) -> TimeKey {
    seconds.round() as TimeKey
}
