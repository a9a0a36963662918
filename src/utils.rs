// Utility functions and helpers
// Shared by the evaluator and the builtins

use crate::error::{EvalError, EvalResult};
use crate::value::Json;

/// Character offset of a byte position in `text`.
pub fn char_offset(text: &str, byte: usize) -> usize {
    text.get(..byte).map_or(0, |prefix| prefix.chars().count())
}

/// Flatten nested arrays up to `depth` levels.
pub fn flatten(items: &[Json], depth: f64) -> Vec<Json> {
    let mut result = Vec::new();
    for item in items {
        match item {
            Json::Array(inner) if depth >= 1.0 => result.extend(flatten(inner, depth - 1.0)),
            other => result.push(other.clone()),
        }
    }
    result
}

/// Start positions of every (possibly overlapping) occurrence of `needle`
/// as a contiguous run of `items`; null for an empty needle.
pub fn subarray_indices(items: &[Json], needle: &[Json]) -> Json {
    if needle.is_empty() {
        return Json::Null;
    }
    let positions = items
        .windows(needle.len())
        .enumerate()
        .filter(|(_, window)| *window == needle)
        .map(|(i, _)| Json::from(i))
        .collect();
    Json::array(positions)
}

/// `indices`: character offsets of a substring, positions of a sub-array,
/// or positions of a single element.
pub fn indices(input: &Json, needle: &Json) -> EvalResult<Json> {
    match (input, needle) {
        (Json::Null, _) | (_, Json::Null) => Ok(Json::Null),
        (Json::String(text), Json::String(pattern)) => {
            if pattern.is_empty() {
                return Ok(Json::Null);
            }
            let mut positions = Vec::new();
            let mut start = 0;
            while let Some(found) = text.get(start..).and_then(|rest| rest.find(&**pattern)) {
                let byte = start + found;
                positions.push(Json::from(char_offset(text, byte)));
                start = byte + text[byte..].chars().next().map_or(1, char::len_utf8);
            }
            Ok(Json::array(positions))
        }
        (Json::Array(items), Json::Array(sub)) => Ok(subarray_indices(items, sub)),
        (Json::Array(items), element) => Ok(subarray_indices(items, std::slice::from_ref(element))),
        _ => Err(EvalError::type_error(
            format!("Can't search {} for {}.", input.json_type(), needle.json_type()),
            vec![input.clone(), needle.clone()],
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json_value;

    #[test]
    fn test_char_offset() {
        assert_eq!(char_offset("aéb", 0), 0);
        assert_eq!(char_offset("aéb", 3), 2);
    }

    #[test]
    fn test_flatten() {
        let items = vec![json_value!(1), json_value!([2, [3, [4]]])];
        assert_eq!(Json::array(flatten(&items, 1.0)), json_value!([1, 2, [3, [4]]]));
        assert_eq!(Json::array(flatten(&items, 10.0)), json_value!([1, 2, 3, 4]));
        assert_eq!(Json::array(flatten(&items, 0.0)), json_value!([1, [2, [3, [4]]]]));
    }

    #[test]
    fn test_subarray_indices() {
        let items = vec![json_value!(1), json_value!(2), json_value!(1), json_value!(2), json_value!(1)];
        let needle = vec![json_value!(1), json_value!(2), json_value!(1)];
        assert_eq!(subarray_indices(&items, &needle), json_value!([0, 2]));
        assert_eq!(subarray_indices(&items, &[]), Json::Null);
    }

    #[test]
    fn test_string_indices() {
        assert_eq!(indices(&json_value!("aaa"), &json_value!("aa")).unwrap(), json_value!([0, 1]));
        assert_eq!(indices(&json_value!("éa,é"), &json_value!("é")).unwrap(), json_value!([0, 3]));
        assert_eq!(indices(&json_value!([1, 2, 1]), &json_value!(1)).unwrap(), json_value!([0, 2]));
        assert!(indices(&json_value!({}), &json_value!("a")).is_err());
    }
}
