use std::time::Duration;

use crate::telemetry::filter_from_value;

pub(crate) fn duration(v: &str) -> Result<Duration, String> {
	humantime::parse_duration(v).map_err(|e| format!("invalid duration: {e}"))
}

pub(crate) fn log_level(v: &str) -> Result<String, String> {
	match filter_from_value(v) {
		Ok(_) => Ok(v.to_owned()),
		Err(e) => Err(format!("invalid log filter: {e}")),
	}
}

pub(crate) fn attempts(v: &str) -> Result<u32, String> {
	match v.parse::<u32>() {
		Ok(0) => Err(String::from("at least one attempt is required")),
		Ok(v) => Ok(v),
		Err(e) => Err(e.to_string()),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_durations() {
		assert_eq!(duration("5s"), Ok(Duration::from_secs(5)));
		assert_eq!(duration("1m 30s"), Ok(Duration::from_secs(90)));
		assert!(duration("soon").is_err());
	}

	#[test]
	fn rejects_zero_attempts() {
		assert!(attempts("0").is_err());
		assert!(attempts("ten").is_err());
		assert_eq!(attempts("3"), Ok(3));
	}

	#[test]
	fn validates_log_levels() {
		assert!(log_level("debug").is_ok());
		assert!(log_level("graphwrite=notalevel").is_err());
	}
}
