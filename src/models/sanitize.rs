use std::collections::BTreeMap;
use tracing::debug;

const MAX_KEY_LEN: usize = 150;
const MAX_PROPERTY_VALUE_LEN: usize = 8192;

pub(crate) trait Sanitize {
    fn sanitize(&mut self);
}

/// Truncates to at most `max` characters without splitting a character.
pub(crate) fn truncate_chars(value: &mut String, max: usize) {
    if let Some((idx, _)) = value.char_indices().nth(max) {
        value.truncate(idx);
    }
}

fn sanitize_keys<V>(map: &mut BTreeMap<String, V>) {
    let long_keys: Vec<_> = map
        .keys()
        .filter(|k| k.chars().count() > MAX_KEY_LEN)
        .cloned()
        .collect();
    for long_key in long_keys {
        if let Some((mut key, value)) = map.remove_entry(&long_key) {
            truncate_chars(&mut key, MAX_KEY_LEN);
            if map.contains_key(&key) {
                debug!(
                    "Truncated property name overrides property with the same name: {}",
                    key
                );
            }
            map.insert(key, value);
        }
    }
}

impl Sanitize for BTreeMap<String, String> {
    fn sanitize(&mut self) {
        sanitize_keys(self);
        for value in self.values_mut() {
            truncate_chars(value, MAX_PROPERTY_VALUE_LEN);
        }
    }
}

impl Sanitize for BTreeMap<String, f64> {
    fn sanitize(&mut self) {
        sanitize_keys(self);
    }
}

impl<T: Sanitize> Sanitize for Option<T> {
    fn sanitize(&mut self) {
        if let Some(inner) = self.as_mut() {
            inner.sanitize();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::iter::FromIterator;

    #[test]
    fn sanitize_properties() {
        let mut properties = BTreeMap::from_iter(vec![
            // Long value
            ("1".repeat(1), "v".repeat(8200)),
            // Long key and long value
            ("2".repeat(160), "v".repeat(8200)),
            // Long key
            ("3".repeat(160), "v".repeat(1)),
            // Long key collides with and replaces other key
            ("4".repeat(150), "x".repeat(1)),
            ("4".repeat(160), "y".repeat(1)),
        ]);
        properties.sanitize();
        assert_eq!(4, properties.len());
        assert_eq!(8192, properties.get("1").unwrap().len());
        assert_eq!(8192, properties.get(&"2".repeat(150)).unwrap().len());
        assert_eq!(1, properties.get(&"3".repeat(150)).unwrap().len());
        assert_eq!("y", properties.get(&"4".repeat(150)).unwrap());
    }

    #[test]
    fn sanitize_measurement_keys() {
        let mut measurements = BTreeMap::from_iter(vec![("m".repeat(200), 1.5)]);
        measurements.sanitize();
        assert_eq!(Some(&1.5), measurements.get(&"m".repeat(150)));
    }

    #[test]
    fn truncate_keeps_char_boundaries() {
        let mut value = "äöü".repeat(10);
        truncate_chars(&mut value, 4);
        assert_eq!("äöüä", value);

        let mut short = String::from("abc");
        truncate_chars(&mut short, 10);
        assert_eq!("abc", short);
    }
}
