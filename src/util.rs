use std::sync::atomic::{AtomicI64, Ordering};

use time::{format_description::FormatItem, macros::format_description, OffsetDateTime};

const STORED_NAME_PREFIX: &[FormatItem<'static>] =
	format_description!("[year][month][day]_[hour][minute][second]_[subsecond digits:9]");

const MAX_NAME_LEN: usize = 100;

pub fn generate_token() -> String {
	// 64 alphanumerics, ~380 bits from the thread-local CSPRNG.

	random_string::generate(
		64,
		"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789",
	)
}

static LAST_MICROS: AtomicI64 = AtomicI64::new(0);

/// Wall-clock time, at microsecond resolution, that never repeats or goes backwards
/// within this process.
pub fn monotonic_now() -> OffsetDateTime {
	let now = now_micros();

	let previous = LAST_MICROS
		.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
			Some(now.max(last + 1))
		})
		.unwrap_or(now);

	from_micros(now.max(previous + 1))
}

pub fn now_micros() -> i64 {
	to_micros(OffsetDateTime::now_utc())
}

pub fn to_micros(at: OffsetDateTime) -> i64 {
	(at.unix_timestamp_nanos() / 1_000) as i64
}

pub fn from_micros(micros: i64) -> OffsetDateTime {
	OffsetDateTime::from_unix_timestamp_nanos(micros as i128 * 1_000)
		.unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

/// Replaces every character outside `[A-Za-z0-9.-]` with `_`.
pub fn sanitize_filename(name: &str) -> String {
	let sanitized: String = name
		.chars()
		.map(|c| match c {
			'A'..='Z' | 'a'..='z' | '0'..='9' | '.' | '-' => c,
			_ => '_',
		})
		.take(MAX_NAME_LEN)
		.collect();

	if sanitized.is_empty() {
		"upload".into()
	} else {
		sanitized
	}
}

pub fn stored_name(original: &str, at: OffsetDateTime) -> String {
	let prefix = at
		.format(STORED_NAME_PREFIX)
		.unwrap_or_else(|_| at.unix_timestamp_nanos().to_string());

	format!("{prefix}_{}", sanitize_filename(original))
}

/// True for names `stored_name` could have produced.
pub fn is_stored_name(name: &str) -> bool {
	!name.is_empty()
		&& !name.starts_with('.')
		&& name
			.chars()
			.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
}

#[cfg(test)]
mod tests {
	use super::*;
	use time::macros::datetime;

	#[test]
	fn sanitize_replaces_unsafe_characters() {
		assert_eq!(sanitize_filename("cat pic.png"), "cat_pic.png");
		assert_eq!(sanitize_filename("../../etc/passwd"), ".._.._etc_passwd");
		assert_eq!(sanitize_filename("ünïcode.gif"), "_n_code.gif");
		assert_eq!(sanitize_filename("clip-01.webm"), "clip-01.webm");
		assert_eq!(sanitize_filename(""), "upload");
	}

	#[test]
	fn sanitize_caps_length() {
		let long = "a".repeat(500) + ".png";

		assert_eq!(sanitize_filename(&long).len(), 100);
	}

	#[test]
	fn stored_name_has_timestamp_prefix() {
		let at = datetime!(2024-03-05 07:08:09.000000123 UTC);

		assert_eq!(
			stored_name("my photo.jpg", at),
			"20240305_070809_000000123_my_photo.jpg"
		);
	}

	#[test]
	fn stored_names_are_recognised() {
		assert!(is_stored_name("20240305_070809_000000123_my_photo.jpg"));
		assert!(!is_stored_name("../secret"));
		assert!(!is_stored_name("a/b.png"));
		assert!(!is_stored_name(".hidden"));
		assert!(!is_stored_name(""));
	}

	#[test]
	fn micros_round_trip_keeps_order() {
		let earlier = datetime!(2024-01-01 00:00:00.000001 UTC);
		let later = datetime!(2024-01-01 00:00:00.000002 UTC);

		assert!(to_micros(earlier) < to_micros(later));
		assert_eq!(from_micros(to_micros(later)), later);
	}

	#[test]
	fn monotonic_now_never_repeats() {
		let mut last = monotonic_now();

		for _ in 0..1000 {
			let next = monotonic_now();
			assert!(next > last);
			last = next;
		}
	}

	#[test]
	fn tokens_are_unique_and_alphanumeric() {
		let a = generate_token();
		let b = generate_token();

		assert_eq!(a.len(), 64);
		assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
		assert_ne!(a, b);
	}
}
