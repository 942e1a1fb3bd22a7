//! Timed pause between steps.

use crate::cancel::CancelToken;
use crate::context::JobContext;
use crate::error::{ObsError, ObsResult};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

// Argument is either a bare integer (milliseconds) or hh:mm:ss with an
// optional fractional-second part; both verb and argument may be omitted.
static GRAMMAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?:delay/)?(?:wait\b)?\s*(?:(\d+):(\d{2}):(\d{2})(?:\.(\d{1,3}))?|(\d+))?$",
    )
    .expect("delay grammar")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayAction {
    pub duration: Duration,
}

impl DelayAction {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    pub async fn execute(&self, _ctx: &JobContext, token: &CancelToken) -> ObsResult<()> {
        token.ensure_active()?;
        if self.duration.is_zero() {
            return Ok(());
        }
        debug!(duration = ?self.duration, "delay");
        tokio::select! {
            _ = tokio::time::sleep(self.duration) => Ok(()),
            _ = token.cancelled() => Err(ObsError::Cancelled),
        }
    }
}

impl Default for DelayAction {
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}

impl FromStr for DelayAction {
    type Err = ObsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let captures = GRAMMAR
            .captures(s.trim())
            .ok_or_else(|| ObsError::Parse(format!("invalid delay command '{s}'")))?;

        let duration = if let Some(ms) = captures.get(5) {
            let ms: u64 = ms
                .as_str()
                .parse()
                .map_err(|e| ObsError::Parse(format!("invalid delay '{s}': {e}")))?;
            Duration::from_millis(ms)
        } else if let Some(hours) = captures.get(1) {
            let hours: u64 = hours
                .as_str()
                .parse()
                .map_err(|e| ObsError::Parse(format!("invalid delay '{s}': {e}")))?;
            // Minutes and seconds are capped at two digits by the grammar.
            let minutes: u64 = captures[2].parse().unwrap_or(0);
            let seconds: u64 = captures[3].parse().unwrap_or(0);
            let millis: u64 = captures
                .get(4)
                // ".5" means half a second, so pad the digits out to
                // milliseconds before parsing.
                .map(|frac| format!("{:0<3}", frac.as_str()).parse().unwrap_or(0))
                .unwrap_or(0);
            let out_of_range = || ObsError::Parse(format!("delay '{s}' is out of range"));
            let total_seconds = hours
                .checked_mul(3600)
                .and_then(|h| h.checked_add(minutes * 60 + seconds))
                .ok_or_else(out_of_range)?;
            Duration::from_secs(total_seconds)
                .checked_add(Duration::from_millis(millis))
                .ok_or_else(out_of_range)?
        } else {
            Duration::ZERO
        };

        Ok(Self::new(duration))
    }
}

impl fmt::Display for DelayAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "delay: {:?}", self.duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_millisecond_and_clock_forms() {
        assert_eq!(
            "wait 100".parse::<DelayAction>().expect("parse").duration,
            Duration::from_millis(100)
        );
        assert_eq!(
            "delay/wait 00:00:05".parse::<DelayAction>().expect("parse").duration,
            Duration::from_secs(5)
        );
        assert_eq!(
            "00:01:02.5".parse::<DelayAction>().expect("parse").duration,
            Duration::from_secs(62) + Duration::from_millis(500)
        );
        assert_eq!(
            "01:00:00.250".parse::<DelayAction>().expect("parse").duration,
            Duration::from_secs(3600) + Duration::from_millis(250)
        );
    }

    #[test]
    fn missing_argument_means_zero() {
        assert_eq!(
            "wait".parse::<DelayAction>().expect("parse").duration,
            Duration::ZERO
        );
        assert_eq!(
            "".parse::<DelayAction>().expect("parse").duration,
            Duration::ZERO
        );
    }

    #[test]
    fn rejects_non_time_arguments() {
        assert!("wait forever".parse::<DelayAction>().is_err());
        assert!("wait 12:34".parse::<DelayAction>().is_err());
        assert!("later 100".parse::<DelayAction>().is_err());
    }

    #[test]
    fn oversized_hour_counts_are_rejected_not_wrapped() {
        // 20 digits: the hour field itself exceeds u64.
        let over_field = "wait 99999999999999999999:00:30".parse::<DelayAction>();
        assert!(matches!(over_field, Err(ObsError::Parse(_))));
        // 19 digits: fits u64 but the total seconds would overflow.
        let over_total = "wait 9999999999999999999:00:00".parse::<DelayAction>();
        assert!(matches!(over_total, Err(ObsError::Parse(_))));
    }
}
