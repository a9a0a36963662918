// Symbolic paths into Json values and the structural edits driven by them

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::error::{EvalError, EvalResult};
use crate::value::{Json, JsonType};

/// One step of a path: an array index, an object key, or a half-open slice.
#[derive(Clone, Debug, PartialEq)]
pub enum PathPart {
    Index(i64),
    Key(Rc<str>),
    Slice { start: Option<f64>, end: Option<f64> },
}

impl PathPart {
    /// The tag of this part's Json representation, used in error messages.
    pub fn json_type(&self) -> JsonType {
        match self {
            PathPart::Index(_) => JsonType::Number,
            PathPart::Key(_) => JsonType::String,
            PathPart::Slice { .. } => JsonType::Object,
        }
    }

    pub fn to_json(&self) -> Json {
        match self {
            PathPart::Index(i) => Json::from(*i),
            PathPart::Key(k) => Json::String(k.clone()),
            PathPart::Slice { start, end } => {
                let mut m = IndexMap::new();
                m.insert("start".to_string(), start.map_or(Json::Null, Json::from));
                m.insert("end".to_string(), end.map_or(Json::Null, Json::from));
                Json::object(m)
            }
        }
    }

    pub fn from_json(value: &Json) -> EvalResult<PathPart> {
        match value {
            Json::Number(_) => Ok(PathPart::Index(value.as_index().unwrap_or(0))),
            Json::String(s) => Ok(PathPart::Key(s.clone())),
            Json::Object(map) => {
                let bound = |name: &str| -> EvalResult<Option<f64>> {
                    match map.get(name) {
                        None | Some(Json::Null) => Ok(None),
                        Some(Json::Number(n)) => Ok(Some(*n)),
                        Some(other) => Err(EvalError::path(
                            format!("Slice bound {} must be a number, got {}.", name, other.json_type()),
                            vec![other.clone()],
                        )),
                    }
                };
                Ok(PathPart::Slice {
                    start: bound("start")?,
                    end: bound("end")?,
                })
            }
            other => Err(EvalError::path(
                format!("Path components must be numbers, strings or slices, got {}.", other.json_type()),
                vec![other.clone()],
            )),
        }
    }
}

impl fmt::Display for PathPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

/// An immutable, append-only sequence of path parts.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct JsonPath {
    parts: Rc<Vec<PathPart>>,
}

impl JsonPath {
    pub fn new() -> Self {
        JsonPath::default()
    }

    pub fn parts(&self) -> &[PathPart] {
        &self.parts
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// A new path with `part` appended; `self` is left untouched.
    pub fn with(&self, part: PathPart) -> JsonPath {
        let mut parts = Vec::with_capacity(self.parts.len() + 1);
        parts.extend(self.parts.iter().cloned());
        parts.push(part);
        JsonPath {
            parts: Rc::new(parts),
        }
    }

    /// A new path with every part of `other` appended.
    pub fn concat(&self, other: &JsonPath) -> JsonPath {
        if other.is_empty() {
            return self.clone();
        }
        let mut parts = Vec::with_capacity(self.parts.len() + other.parts.len());
        parts.extend(self.parts.iter().cloned());
        parts.extend(other.parts.iter().cloned());
        JsonPath {
            parts: Rc::new(parts),
        }
    }

    /// The path without its first part.
    pub fn drop_first(&self) -> JsonPath {
        JsonPath {
            parts: Rc::new(self.parts.iter().skip(1).cloned().collect()),
        }
    }

    pub fn to_json(&self) -> Json {
        Json::array(self.parts.iter().map(PathPart::to_json).collect())
    }

    pub fn from_json(value: &Json) -> EvalResult<JsonPath> {
        match value {
            Json::Array(items) => {
                let parts = items
                    .iter()
                    .map(PathPart::from_json)
                    .collect::<EvalResult<Vec<_>>>()?;
                Ok(JsonPath {
                    parts: Rc::new(parts),
                })
            }
            other => Err(EvalError::path(
                "Path must be specified as an array.".to_string(),
                vec![other.clone()],
            )),
        }
    }
}

impl From<Vec<PathPart>> for JsonPath {
    fn from(parts: Vec<PathPart>) -> Self {
        JsonPath {
            parts: Rc::new(parts),
        }
    }
}

// ── Index resolution ─────────────────────────────────────────────────────────

/// Resolve slice bounds against a length: start rounds down, end rounds up,
/// negative bounds count from the end, and the result is clamped in range.
pub fn resolve_slice(len: usize, start: Option<f64>, end: Option<f64>) -> (usize, usize) {
    let len_f = len as f64;
    let clamp = |v: f64| -> usize {
        let v = if v < 0.0 { v + len_f } else { v };
        v.max(0.0).min(len_f) as usize
    };
    let s = clamp(start.map_or(0.0, f64::floor));
    let e = clamp(end.map_or(len_f, f64::ceil));
    (s, e.max(s))
}

/// Resolve a possibly negative array index; `None` when it falls before the start.
pub fn resolve_index(len: usize, index: i64) -> Option<usize> {
    if index < 0 {
        let adjusted = len as i64 + index;
        if adjusted < 0 {
            None
        } else {
            Some(adjusted as usize)
        }
    } else {
        Some(index as usize)
    }
}

fn index_error(value: &Json, part: &PathPart) -> EvalError {
    EvalError::type_error(
        format!("Can't index {} with {}.", value.json_type(), part.json_type()),
        vec![value.clone(), part.to_json()],
    )
}

// ── Reading ──────────────────────────────────────────────────────────────────

/// Read a single step; missing keys and out-of-range indices read as null.
pub fn get_part(value: &Json, part: &PathPart) -> EvalResult<Json> {
    match (value, part) {
        (Json::Null, _) => Ok(Json::Null),
        (Json::Object(map), PathPart::Key(k)) => Ok(map.get(&**k).cloned().unwrap_or(Json::Null)),
        (Json::Array(arr), PathPart::Index(i)) => Ok(resolve_index(arr.len(), *i)
            .and_then(|idx| arr.get(idx))
            .cloned()
            .unwrap_or(Json::Null)),
        (Json::Array(arr), PathPart::Slice { start, end }) => {
            let (s, e) = resolve_slice(arr.len(), *start, *end);
            Ok(Json::array(arr[s..e].to_vec()))
        }
        (Json::String(text), PathPart::Slice { start, end }) => {
            let chars: Vec<char> = text.chars().collect();
            let (s, e) = resolve_slice(chars.len(), *start, *end);
            Ok(Json::from(chars[s..e].iter().collect::<String>()))
        }
        _ => Err(index_error(value, part)),
    }
}

pub fn get_path(value: &Json, path: &[PathPart]) -> EvalResult<Json> {
    match path.split_first() {
        None => Ok(value.clone()),
        Some((first, rest)) => {
            if value.is_null() {
                return Ok(Json::Null);
            }
            let child = get_part(value, first)?;
            get_path(&child, rest)
        }
    }
}

// ── Structural replace ───────────────────────────────────────────────────────

/// Highest index an update may grow an array to.
pub const MAX_ARRAY_INDEX: usize = 1 << 24;

/// Transform the value stored at `path`, rebuilding every ancestor with the
/// single child replaced. Missing containers along the way are created from
/// null, arrays are padded with nulls when written past their end.
pub fn update_path<F>(value: Json, path: &[PathPart], f: &mut F) -> EvalResult<Json>
where
    F: FnMut(Json) -> EvalResult<Json>,
{
    let (first, rest) = match path.split_first() {
        None => return f(value),
        Some(split) => split,
    };

    match (value, first) {
        (Json::Null, PathPart::Key(_)) => update_path(Json::empty_object(), path, f),
        (Json::Null, PathPart::Index(_)) | (Json::Null, PathPart::Slice { .. }) => {
            update_path(Json::array(Vec::new()), path, f)
        }
        (Json::Object(mut map), PathPart::Key(k)) => {
            let child = map.get(&**k).cloned().unwrap_or(Json::Null);
            let updated = update_path(child, rest, f)?;
            Rc::make_mut(&mut map).insert(k.to_string(), updated);
            Ok(Json::Object(map))
        }
        (Json::Array(mut arr), PathPart::Index(i)) => {
            let idx = resolve_index(arr.len(), *i).ok_or_else(|| {
                EvalError::path(
                    "Out of bounds negative array index.".to_string(),
                    vec![Json::Array(arr.clone()), Json::from(*i)],
                )
            })?;
            if idx >= arr.len() && idx > MAX_ARRAY_INDEX {
                return Err(EvalError::path(
                    "Array index too large.".to_string(),
                    vec![Json::Array(arr.clone()), Json::from(*i)],
                ));
            }
            let child = arr.get(idx).cloned().unwrap_or(Json::Null);
            let updated = update_path(child, rest, f)?;
            let items = Rc::make_mut(&mut arr);
            if idx >= items.len() {
                items.resize(idx + 1, Json::Null);
            }
            items[idx] = updated;
            Ok(Json::Array(arr))
        }
        (Json::Array(mut arr), PathPart::Slice { start, end }) => {
            let (s, e) = resolve_slice(arr.len(), *start, *end);
            let child = Json::array(arr[s..e].to_vec());
            match update_path(child, rest, f)? {
                Json::Array(replacement) => {
                    let items = Rc::make_mut(&mut arr);
                    items.splice(s..e, replacement.iter().cloned());
                    Ok(Json::Array(arr))
                }
                other => Err(EvalError::type_error(
                    format!("A slice of an array can only be assigned an Array, not {}.", other.json_type()),
                    vec![other],
                )),
            }
        }
        (value, part) => Err(index_error(&value, part)),
    }
}

pub fn set_path(value: Json, path: &[PathPart], replacement: Json) -> EvalResult<Json> {
    let mut replacement = Some(replacement);
    update_path(value, path, &mut |_| Ok(replacement.take().unwrap_or(Json::Null)))
}

// ── Deletion ─────────────────────────────────────────────────────────────────

/// Delete the value at `path`. Deleting the root yields null; deleting through
/// a missing container is a no-op.
pub fn delete_path(value: Json, path: &[PathPart]) -> EvalResult<Json> {
    let (first, rest) = match path.split_first() {
        None => return Ok(Json::Null),
        Some(split) => split,
    };

    if value.is_null() {
        return Ok(Json::Null);
    }

    if !rest.is_empty() {
        let child = get_part(&value, first)?;
        if child.is_null() {
            return Ok(value);
        }
        let updated = delete_path(child, rest)?;
        return set_path(value, std::slice::from_ref(first), updated);
    }

    match (value, first) {
        (Json::Object(mut map), PathPart::Key(k)) => {
            if map.contains_key(&**k) {
                Rc::make_mut(&mut map).shift_remove(&**k);
            }
            Ok(Json::Object(map))
        }
        (Json::Array(mut arr), PathPart::Index(i)) => {
            if let Some(idx) = resolve_index(arr.len(), *i) {
                if idx < arr.len() {
                    Rc::make_mut(&mut arr).remove(idx);
                }
            }
            Ok(Json::Array(arr))
        }
        (Json::Array(mut arr), PathPart::Slice { start, end }) => {
            let (s, e) = resolve_slice(arr.len(), *start, *end);
            if s < e {
                Rc::make_mut(&mut arr).drain(s..e);
            }
            Ok(Json::Array(arr))
        }
        (value, part) => Err(EvalError::type_error(
            format!("Can't delete {} field of {}.", part.json_type(), value.json_type()),
            vec![value.clone(), part.to_json()],
        )),
    }
}

/// Delete several paths. Paths are applied in descending order of their Json
/// representation so removing an earlier array element never shifts a later
/// one still waiting to be removed.
pub fn delete_paths(value: Json, paths: &[JsonPath]) -> EvalResult<Json> {
    let mut keyed: Vec<(Json, &JsonPath)> = paths.iter().map(|p| (p.to_json(), p)).collect();
    keyed.sort_by(|a, b| b.0.cmp(&a.0));
    keyed.dedup_by(|a, b| a.0 == b.0);

    let mut result = value;
    for (_, path) in keyed {
        result = delete_path(result, path.parts())?;
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json_value;

    fn key(k: &str) -> PathPart {
        PathPart::Key(k.into())
    }

    #[test]
    fn test_path_json_roundtrip() {
        let path = JsonPath::from(vec![
            key("a"),
            PathPart::Index(2),
            PathPart::Slice {
                start: Some(1.0),
                end: None,
            },
        ]);
        let json = path.to_json();
        assert_eq!(json.to_string(), r#"["a",2,{"start":1,"end":null}]"#);
        assert_eq!(JsonPath::from_json(&json).unwrap(), path);
    }

    #[test]
    fn test_with_does_not_disturb_original() {
        let base = JsonPath::new().with(key("a"));
        let extended = base.with(PathPart::Index(0));
        assert_eq!(base.len(), 1);
        assert_eq!(extended.len(), 2);
        assert_eq!(extended.drop_first().parts(), &[PathPart::Index(0)]);
    }

    #[test]
    fn test_get_path_missing_reads_null() {
        let v = json_value!({"a": [1, 2]});
        assert_eq!(get_path(&v, &[key("a"), PathPart::Index(5)]).unwrap(), Json::Null);
        assert_eq!(get_path(&v, &[key("b"), key("c")]).unwrap(), Json::Null);
        assert_eq!(get_path(&v, &[key("a"), PathPart::Index(-1)]).unwrap(), json_value!(2));
    }

    #[test]
    fn test_get_path_type_mismatch() {
        let v = json_value!([1, 2]);
        let err = get_path(&v, &[key("a")]).unwrap_err();
        assert_eq!(err.kind.to_string(), "Can't index Array with String.");
    }

    #[test]
    fn test_set_path_shares_untouched_siblings() {
        let v = json_value!({"a": {"b": 1}, "c": [1, 2, 3]});
        let updated = set_path(v.clone(), &[key("a"), key("b")], json_value!(5)).unwrap();
        assert_eq!(updated, json_value!({"a": {"b": 5}, "c": [1, 2, 3]}));
        assert_eq!(v, json_value!({"a": {"b": 1}, "c": [1, 2, 3]}));
        if let (Json::Object(old), Json::Object(new)) = (&v, &updated) {
            match (old.get("c"), new.get("c")) {
                (Some(Json::Array(a)), Some(Json::Array(b))) => assert!(Rc::ptr_eq(a, b)),
                _ => panic!("expected arrays"),
            }
        }
    }

    #[test]
    fn test_set_path_creates_and_pads() {
        let v = set_path(Json::Null, &[key("a"), PathPart::Index(2)], json_value!(1)).unwrap();
        assert_eq!(v, json_value!({"a": [null, null, 1]}));
    }

    #[test]
    fn test_set_path_rejects_huge_index() {
        let err = set_path(json_value!([]), &[PathPart::Index(1_000_000_000_000_000_000)], json_value!(1)).unwrap_err();
        assert_eq!(err.kind.to_string(), "Array index too large.");
        assert!(matches!(err.kind, crate::error::EvalErrorKind::Path { .. }));
        let padded = set_path(Json::Null, &[PathPart::Index(3)], json_value!(1)).unwrap();
        assert_eq!(padded, json_value!([null, null, null, 1]));
    }

    #[test]
    fn test_set_slice() {
        let v = json_value!([1, 2, 3, 4]);
        let slice = PathPart::Slice {
            start: Some(1.0),
            end: Some(3.0),
        };
        let updated = set_path(v, &[slice], json_value!(["x"])).unwrap();
        assert_eq!(updated, json_value!([1, "x", 4]));
    }

    #[test]
    fn test_delete_paths_descending() {
        let v = json_value!([1, 2, 3]);
        let paths = vec![
            JsonPath::from(vec![PathPart::Index(1)]),
            JsonPath::from(vec![PathPart::Index(2)]),
        ];
        assert_eq!(delete_paths(v, &paths).unwrap(), json_value!([1]));
    }

    #[test]
    fn test_delete_missing_is_noop() {
        let v = json_value!({"a": 1});
        let paths = vec![JsonPath::from(vec![key("b"), key("c")])];
        assert_eq!(delete_paths(v.clone(), &paths).unwrap(), v);
    }

    #[test]
    fn test_resolve_slice_bounds() {
        assert_eq!(resolve_slice(5, Some(-2.0), None), (3, 5));
        assert_eq!(resolve_slice(5, Some(4.0), Some(2.0)), (4, 4));
        assert_eq!(resolve_slice(5, Some(1.5), Some(2.5)), (1, 3));
    }
}
