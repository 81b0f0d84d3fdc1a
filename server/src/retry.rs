//! Requeue-delay policy for failed reconciliations.

use std::time::Duration;

use chrono::{DateTime, Utc};

const MIN_DELAY: Duration = Duration::from_secs(10);
const MAX_DELAY: Duration = Duration::from_secs(600);

/// Delay before retrying a machine whose last attempt failed at
/// `last_error`. Grows with the age of the error so a persistently
/// failing machine backs off, bounded to ten minutes. No recorded
/// error means retry immediately.
pub fn retry_delay(last_error: Option<DateTime<Utc>>) -> Duration {
    let Some(at) = last_error else {
        return Duration::ZERO;
    };
    let elapsed = (Utc::now() - at).to_std().unwrap_or(Duration::ZERO);
    (elapsed + MIN_DELAY).min(MAX_DELAY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[test]
    fn test_no_error_no_delay() {
        assert_eq!(retry_delay(None), Duration::ZERO);
    }

    #[test]
    fn test_fresh_error_waits_minimum() {
        let delay = retry_delay(Some(Utc::now()));
        assert!(delay >= Duration::from_secs(10));
        assert!(delay < Duration::from_secs(12));
    }

    #[test]
    fn test_delay_grows_with_error_age() {
        let delay = retry_delay(Some(Utc::now() - TimeDelta::seconds(90)));
        assert!(delay >= Duration::from_secs(100));
        assert!(delay < Duration::from_secs(105));
    }

    #[test]
    fn test_delay_capped_at_ten_minutes() {
        let delay = retry_delay(Some(Utc::now() - TimeDelta::hours(3)));
        assert_eq!(delay, Duration::from_secs(600));
    }

    #[test]
    fn test_future_timestamp_waits_minimum() {
        let delay = retry_delay(Some(Utc::now() + TimeDelta::seconds(30)));
        assert_eq!(delay, Duration::from_secs(10));
    }
}
