// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Http date handling. We only ever emit the RFC 1123 form
//! (`Sun, 06 Nov 1994 08:49:37 GMT`, always 29 bytes), but accept all
//! three formats RFC 7231 allows on the way in.

use chrono::{DateTime, Datelike, NaiveDateTime, TimeZone, Utc};

const RFC1123_FMT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// The current time formatted for a Date header.
pub fn now() -> String {
    format(Utc::now())
}

pub fn format(t: DateTime<Utc>) -> String {
    t.format(RFC1123_FMT).to_string()
}

/// Parse an http date in any of the three RFC 7231 formats. RFC 850
/// dates carry a two digit year which gets normalized to 20xx.
pub fn parse(s: &str) -> Option<DateTime<Utc>> {
    // Sun, 06 Nov 1994 08:49:37 GMT  ; RFC 822, updated by RFC 1123
    if let Ok(t) = NaiveDateTime::parse_from_str(s, RFC1123_FMT) {
        return Utc.from_utc_datetime(&t).into();
    }
    // Sun Nov  6 08:49:37 1994       ; ANSI C's asctime() format
    if let Ok(t) = NaiveDateTime::parse_from_str(s, "%a %b %e %H:%M:%S %Y") {
        return Utc.from_utc_datetime(&t).into();
    }
    // Sunday, 06-Nov-94 08:49:37 GMT ; RFC 850, obsoleted by RFC 1036
    if let Ok(t) = NaiveDateTime::parse_from_str(s, "%A, %d-%b-%y %H:%M:%S GMT") {
        let t = if t.year() < 2000 { t.with_year(t.year() + 100)? } else { t };
        return Utc.from_utc_datetime(&t).into();
    }
    None
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn format_is_29_bytes() {
        let t = Utc.with_ymd_and_hms(1994, 11, 6, 8, 49, 37).unwrap();
        let s = format(t);
        assert_eq!(s, "Sun, 06 Nov 1994 08:49:37 GMT");
        assert_eq!(s.len(), 29);
    }

    #[test]
    fn parse_accepts_all_three_formats() {
        let want = Utc.with_ymd_and_hms(1994, 11, 6, 8, 49, 37).unwrap();
        let cases = vec!["Sun, 06 Nov 1994 08:49:37 GMT", "Sun Nov  6 08:49:37 1994"];
        for s in cases {
            assert_eq!(parse(s), Some(want), "input: {s}");
        }
        // the rfc 850 form parses too, but its two digit year lands in 20xx
        let got = parse("Sunday, 06-Nov-94 08:49:37 GMT").expect("rfc 850 date to parse");
        assert_eq!((got.month(), got.day()), (11, 6));
    }

    #[test]
    fn two_digit_years_become_20xx() {
        let got = parse("Sunday, 06-Nov-94 08:49:37 GMT").expect("rfc 850 date to parse");
        assert_eq!(got.year(), 1994 + 100);
    }

    #[test]
    fn round_trip() {
        let cases = vec![
            Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(1982, 10, 1, 23, 52, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 2, 29, 12, 0, 1).unwrap(),
            Utc.with_ymd_and_hms(2038, 1, 19, 3, 14, 7).unwrap(),
        ];
        for t in cases {
            assert_eq!(parse(&format(t)), Some(t));
            let s = format(t);
            assert_eq!(format(parse(&s).unwrap()), s);
        }
    }

    #[test]
    fn garbage_is_rejected() {
        for s in ["", "not a date", "Sun, 99 Nov 1994 08:49:37 GMT"] {
            assert_eq!(parse(s), None, "input: {s}");
        }
    }
}
