use crate::Error;
use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use serde::Serializer;

/// Formats a request duration as `[d.]hh:mm:ss.fff`. The day prefix only appears for durations of
/// a day or longer.
pub(crate) fn duration_to_string(duration: TimeDelta) -> Result<String, Error> {
    let millis = duration.num_milliseconds();
    if millis < 0 {
        return Err(Error::InvalidArgument(
            "request duration cannot be negative".into(),
        ));
    }

    let ms = millis % 1000;
    let s = millis / 1000 % 60;
    let m = millis / 1000 / 60 % 60;
    let h = millis / 1000 / 60 / 60 % 24;
    let d = millis / 1000 / 60 / 60 / 24;
    let formatted = format!("{:0>2}:{:0>2}:{:0>2}.{:0>3}", h, m, s, ms);
    if d > 0 {
        Ok(format!("{}.{}", d, formatted))
    } else {
        Ok(formatted)
    }
}

pub(crate) fn time_to_string(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn serialize_time<S>(time: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&time_to_string(*time))
}

/// Turns a request path into a request name: percent-escapes are decoded and every non-ASCII
/// character is written as a backslash escape.
pub(crate) fn request_name(path: &str) -> String {
    let decoded = urlencoding::decode_binary(path.as_bytes());
    let decoded = String::from_utf8_lossy(&decoded);
    let mut name = String::with_capacity(decoded.len());
    for c in decoded.chars() {
        if c.is_ascii() {
            name.push(c);
        } else {
            let code = c as u32;
            let escaped = if code <= 0xff {
                format!("\\x{:02x}", code)
            } else if code <= 0xffff {
                format!("\\u{:04x}", code)
            } else {
                format!("\\U{:08x}", code)
            };
            name.push_str(&escaped);
        }
    }
    name
}
