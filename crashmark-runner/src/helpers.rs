// Copyright (c) The crashmark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};

/// Sentinel class name for identifiers without a class segment.
pub(crate) static UNKNOWN_CLASS: &str = "UnknownClass";

/// The current local time as an ISO-8601 / RFC 3339 string.
pub(crate) fn now_iso() -> String {
    Local::now().to_rfc3339()
}

/// Parses an ISO-8601 timestamp, tolerating a missing UTC offset.
///
/// Markers written by this crate carry an offset; markers written by other
/// tooling may not, in which case the timestamp is taken as local time.
pub(crate) fn parse_timestamp(value: &str) -> Option<DateTime<Local>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Local));
    }
    let naive = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
    Local.from_local_datetime(&naive).single()
}

/// The file part of an identifier: everything before the first `::`.
pub(crate) fn file_part(nodeid: &str) -> Option<&str> {
    nodeid.split_once("::").map(|(file, _)| file)
}

/// The leaf name of an identifier: the last `::` segment.
pub(crate) fn leaf_name(nodeid: &str) -> &str {
    nodeid.rsplit("::").next().unwrap_or(nodeid)
}

/// Best-effort class extraction: the second `::` segment when present.
pub(crate) fn test_class(nodeid: &str) -> &str {
    nodeid.split("::").nth(1).unwrap_or(UNKNOWN_CLASS)
}

/// Maps the file part of an identifier to a dotted module path.
pub(crate) fn module_part(file_part: &str) -> String {
    let module = file_part.replace(['/', '\\'], ".");
    module.strip_suffix(".py").map(ToOwned::to_owned).unwrap_or(module)
}

/// The file part of an identifier with a trailing `.py` stripped, used to
/// anchor identifiers that aren't file-qualified.
pub(crate) fn file_stem(nodeid: &str) -> String {
    let file = file_part(nodeid).unwrap_or(nodeid);
    file.strip_suffix(".py").unwrap_or(file).to_owned()
}

/// Formats a duration in seconds as `HH:MM:SS`.
pub(crate) fn format_hms(duration: f64) -> String {
    let total = duration.max(0.0) as u64;
    format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("tests/test_mod.py::test_crash", Some("tests/test_mod.py"); "file qualified")]
    #[test_case("test_crash", None; "bare name")]
    fn file_part_cases(nodeid: &str, expected: Option<&str>) {
        assert_eq!(file_part(nodeid), expected);
    }

    #[test_case("tests/test_mod.py::TestCls::test_a", "TestCls"; "with class")]
    #[test_case("tests/test_mod.py::test_a", "test_a"; "two segments")]
    #[test_case("test_a", "UnknownClass"; "no separators")]
    fn test_class_cases(nodeid: &str, expected: &str) {
        assert_eq!(test_class(nodeid), expected);
    }

    #[test]
    fn leaf_and_module() {
        assert_eq!(leaf_name("tests/test_mod.py::TestCls::test_a"), "test_a");
        assert_eq!(leaf_name("test_a"), "test_a");
        assert_eq!(module_part("tests/test_mod.py"), "tests.test_mod");
        assert_eq!(module_part("tests\\test_mod.py"), "tests.test_mod");
    }

    #[test]
    fn format_hms_rounds_down() {
        assert_eq!(format_hms(0.0), "00:00:00");
        assert_eq!(format_hms(59.9), "00:00:59");
        assert_eq!(format_hms(3723.4), "01:02:03");
        assert_eq!(format_hms(-5.0), "00:00:00");
    }

    #[test]
    fn parse_timestamp_tolerates_missing_offset() {
        assert!(parse_timestamp("2026-08-07T10:15:30.250+02:00").is_some());
        assert!(parse_timestamp("2026-08-07T10:15:30.250").is_some());
        assert!(parse_timestamp("2026-08-07T10:15:30").is_some());
        assert!(parse_timestamp("not a timestamp").is_none());
        assert!(parse_timestamp("").is_none());
    }
}
