// Json: Rc-wrapped immutable value type with O(1) cloning
// Every "mutation" produces a new value sharing untouched substructure

use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

/// An immutable JSON value with O(1) clone semantics via Rc-wrapping.
///
/// Arrays, objects and strings are shared between every value derived from
/// them; edits go through `Rc::make_mut`, which copies only when the storage
/// is shared, so an "updated" value never disturbs the one it came from.
#[derive(Clone, Debug)]
pub enum Json {
    /// Lowest tag of the default order. No filter produces it; it reads as
    /// `null` everywhere a value is printed or tested.
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Array(Rc<Vec<Json>>),
    Object(Rc<IndexMap<String, Json>>),
}

/// Type tags in their default sort order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JsonType {
    Undefined,
    Null,
    False,
    True,
    Number,
    String,
    Array,
    Object,
}

impl fmt::Display for JsonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JsonType::Undefined => "Undefined",
            JsonType::Null => "Null",
            JsonType::False => "False",
            JsonType::True => "True",
            JsonType::Number => "Number",
            JsonType::String => "String",
            JsonType::Array => "Array",
            JsonType::Object => "Object",
        };
        f.write_str(name)
    }
}

// ── Type checks ──────────────────────────────────────────────────────────────

impl Json {
    #[inline]
    pub fn json_type(&self) -> JsonType {
        match self {
            Json::Undefined => JsonType::Undefined,
            Json::Null => JsonType::Null,
            Json::Bool(false) => JsonType::False,
            Json::Bool(true) => JsonType::True,
            Json::Number(_) => JsonType::Number,
            Json::String(_) => JsonType::String,
            Json::Array(_) => JsonType::Array,
            Json::Object(_) => JsonType::Object,
        }
    }

    /// The name reported by the `type` builtin.
    pub fn type_name(&self) -> &'static str {
        match self {
            Json::Undefined | Json::Null => "null",
            Json::Bool(_) => "boolean",
            Json::Number(_) => "number",
            Json::String(_) => "string",
            Json::Array(_) => "array",
            Json::Object(_) => "object",
        }
    }

    /// Everything except `null`, `false` and undefined is truthy.
    #[inline]
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Json::Null | Json::Undefined | Json::Bool(false))
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Json::Null)
    }

    #[inline]
    pub fn is_string(&self) -> bool {
        matches!(self, Json::String(_))
    }

    #[inline]
    pub fn is_array(&self) -> bool {
        matches!(self, Json::Array(_))
    }
}

// ── Extraction ───────────────────────────────────────────────────────────────

impl Json {
    #[inline]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Json::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Numbers used as indices are truncated towards negative infinity.
    #[inline]
    pub fn as_index(&self) -> Option<i64> {
        match self {
            Json::Number(n) if n.is_finite() => Some(n.floor() as i64),
            Json::Number(n) if *n == f64::INFINITY => Some(i64::MAX),
            Json::Number(n) if *n == f64::NEG_INFINITY => Some(i64::MIN),
            _ => None,
        }
    }

    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Json::String(s) => Some(s),
            _ => None,
        }
    }

    /// Index into an object by key.
    #[inline]
    pub fn get(&self, key: &str) -> Option<&Json> {
        match self {
            Json::Object(map) => map.get(key),
            _ => None,
        }
    }
}

// ── Constructors ─────────────────────────────────────────────────────────────

impl Json {
    #[inline]
    pub fn string(s: impl Into<Rc<str>>) -> Self {
        Json::String(s.into())
    }

    #[inline]
    pub fn array(v: Vec<Json>) -> Self {
        Json::Array(Rc::new(v))
    }

    #[inline]
    pub fn object(m: IndexMap<String, Json>) -> Self {
        Json::Object(Rc::new(m))
    }

    #[inline]
    pub fn empty_object() -> Self {
        Json::Object(Rc::new(IndexMap::new()))
    }
}

// ── From impls ───────────────────────────────────────────────────────────────

impl From<bool> for Json {
    #[inline]
    fn from(b: bool) -> Self {
        Json::Bool(b)
    }
}

impl From<i64> for Json {
    #[inline]
    fn from(n: i64) -> Self {
        Json::Number(n as f64)
    }
}

impl From<i32> for Json {
    #[inline]
    fn from(n: i32) -> Self {
        Json::Number(n as f64)
    }
}

impl From<usize> for Json {
    #[inline]
    fn from(n: usize) -> Self {
        Json::Number(n as f64)
    }
}

impl From<f64> for Json {
    #[inline]
    fn from(n: f64) -> Self {
        Json::Number(n)
    }
}

impl From<&str> for Json {
    #[inline]
    fn from(s: &str) -> Self {
        Json::String(s.into())
    }
}

impl From<String> for Json {
    #[inline]
    fn from(s: String) -> Self {
        Json::String(s.into())
    }
}

impl From<Vec<Json>> for Json {
    #[inline]
    fn from(v: Vec<Json>) -> Self {
        Json::Array(Rc::new(v))
    }
}

impl From<IndexMap<String, Json>> for Json {
    #[inline]
    fn from(m: IndexMap<String, Json>) -> Self {
        Json::Object(Rc::new(m))
    }
}

// ── Ordering and equality ────────────────────────────────────────────────────

/// Numbers compare numerically; NaN sorts below every other number and equal
/// to itself so the order stays total.
fn compare_numbers(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

/// Objects compare by their sorted key sets first, then by the values under
/// each key taken in sorted key order.
fn compare_objects(a: &IndexMap<String, Json>, b: &IndexMap<String, Json>) -> Ordering {
    let mut a_keys: Vec<&String> = a.keys().collect();
    let mut b_keys: Vec<&String> = b.keys().collect();
    a_keys.sort();
    b_keys.sort();
    match a_keys.cmp(&b_keys) {
        Ordering::Equal => {}
        other => return other,
    }
    for key in a_keys {
        // Both maps hold exactly the same key set here.
        let ord = match (a.get(key), b.get(key)) {
            (Some(x), Some(y)) => x.cmp(y),
            _ => Ordering::Equal,
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

impl Ord for Json {
    fn cmp(&self, other: &Self) -> Ordering {
        let (lt, rt) = (self.json_type(), other.json_type());
        if lt != rt {
            return lt.cmp(&rt);
        }
        match (self, other) {
            (Json::Number(a), Json::Number(b)) => compare_numbers(*a, *b),
            (Json::String(a), Json::String(b)) => a.cmp(b),
            (Json::Array(a), Json::Array(b)) => {
                if Rc::ptr_eq(a, b) {
                    return Ordering::Equal;
                }
                a.iter().cmp(b.iter())
            }
            (Json::Object(a), Json::Object(b)) => {
                if Rc::ptr_eq(a, b) {
                    return Ordering::Equal;
                }
                compare_objects(a, b)
            }
            // Same tag and no payload: Undefined, Null, False, True.
            _ => Ordering::Equal,
        }
    }
}

impl PartialOrd for Json {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Deep structural equality: tags must match and object comparison ignores
/// storage order.
impl PartialEq for Json {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Json::Object(a), Json::Object(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(k, v)| b.get(k).map_or(false, |w| v == w))
            }
            _ => self.cmp(other) == Ordering::Equal,
        }
    }
}

impl Eq for Json {}

impl Json {
    /// Equality as the `==` operator sees it: structural, except that a NaN
    /// number equals nothing, itself included.
    pub fn equals(&self, other: &Json) -> bool {
        match (self, other) {
            (Json::Number(a), Json::Number(b)) => a == b,
            (Json::Array(a), Json::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.equals(y))
            }
            (Json::Object(a), Json::Object(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(k, v)| b.get(k).map_or(false, |w| v.equals(w)))
            }
            _ => self == other,
        }
    }
}

// ── Display ──────────────────────────────────────────────────────────────────

impl fmt::Display for Json {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Json::Null | Json::Undefined => write!(f, "null"),
            Json::Bool(b) => write!(f, "{}", b),
            Json::Number(n) => f.write_str(&format_number(*n)),
            Json::String(s) => write!(f, "\"{}\"", escape_json_string(s)),
            Json::Array(arr) => {
                write!(f, "[")?;
                for (i, v) in arr.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            Json::Object(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "\"{}\":{}", escape_json_string(k), v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

pub(crate) fn escape_json_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => result.push_str("\\\""),
            '\\' => result.push_str("\\\\"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            '\u{8}' => result.push_str("\\b"),
            '\u{c}' => result.push_str("\\f"),
            c if c < '\x20' || c == '\x7f' => {
                result.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => result.push(c),
        }
    }
    result
}

/// Integral values print without a fractional part; everything else goes
/// through serde_json's shortest round-trip formatting.
pub(crate) fn format_number(n: f64) -> String {
    if n.is_nan() {
        "null".to_string()
    } else if n.is_infinite() {
        if n > 0.0 {
            "1.7976931348623157e+308".to_string()
        } else {
            "-1.7976931348623157e+308".to_string()
        }
    } else if n.fract() == 0.0 && n.abs() < 1e17 {
        format!("{}", n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(|num| num.to_string())
            .unwrap_or_else(|| "null".to_string())
    }
}

// ── Serialization ────────────────────────────────────────────────────────────

impl Serialize for Json {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Json::Null | Json::Undefined => serializer.serialize_none(),
            Json::Bool(b) => serializer.serialize_bool(*b),
            Json::Number(n) => {
                if n.is_nan() {
                    serializer.serialize_none()
                } else if n.is_infinite() {
                    serializer.serialize_f64(if *n > 0.0 { f64::MAX } else { f64::MIN })
                } else if n.fract() == 0.0 && n.abs() < 1e17 {
                    serializer.serialize_i64(*n as i64)
                } else {
                    serializer.serialize_f64(*n)
                }
            }
            Json::String(s) => serializer.serialize_str(s),
            Json::Array(arr) => {
                let mut seq = serializer.serialize_seq(Some(arr.len()))?;
                for v in arr.iter() {
                    seq.serialize_element(v)?;
                }
                seq.end()
            }
            Json::Object(map) => {
                let mut m = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map.iter() {
                    m.serialize_entry(k, v)?;
                }
                m.end()
            }
        }
    }
}

// ── Deserialization (single-pass JSON→Json) ──────────────────────────────────

impl<'de> serde::Deserialize<'de> for Json {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(JsonVisitor)
    }
}

struct JsonVisitor;

impl<'de> Visitor<'de> for JsonVisitor {
    type Value = Json;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "any valid JSON value")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Json, E> {
        Ok(Json::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Json, E> {
        Ok(Json::Number(v as f64))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Json, E> {
        Ok(Json::Number(v as f64))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Json, E> {
        Ok(Json::Number(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Json, E> {
        Ok(Json::string(v))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Json, E> {
        Ok(Json::String(v.into()))
    }

    fn visit_none<E: de::Error>(self) -> Result<Json, E> {
        Ok(Json::Null)
    }

    fn visit_unit<E: de::Error>(self) -> Result<Json, E> {
        Ok(Json::Null)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Json, A::Error> {
        let mut vec = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(elem) = seq.next_element()? {
            vec.push(elem);
        }
        Ok(Json::array(vec))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Json, A::Error> {
        let mut m = IndexMap::with_capacity(map.size_hint().unwrap_or(0));
        while let Some((k, v)) = map.next_entry()? {
            m.insert(k, v);
        }
        Ok(Json::object(m))
    }
}

// ── JSON string I/O ──────────────────────────────────────────────────────────

impl Json {
    /// Parse a JSON string into a Json value (single pass, no intermediate serde_json::Value).
    pub fn from_json_str(s: &str) -> Result<Json, serde_json::Error> {
        serde_json::from_str(s)
    }
}

// ── Conversion from serde_json::Value ────────────────────────────────────────

impl From<serde_json::Value> for Json {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Json::Null,
            serde_json::Value::Bool(b) => Json::Bool(b),
            serde_json::Value::Number(n) => Json::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => Json::String(s.into()),
            serde_json::Value::Array(arr) => {
                Json::Array(Rc::new(arr.into_iter().map(Json::from).collect()))
            }
            serde_json::Value::Object(map) => {
                let m: IndexMap<String, Json> =
                    map.into_iter().map(|(k, v)| (k, Json::from(v))).collect();
                Json::Object(Rc::new(m))
            }
        }
    }
}

// ── json_value! macro ────────────────────────────────────────────────────────

/// Macro for constructing Json literals, similar to serde_json::json!
///
/// Usage:
///   json_value!(null)           → Json::Null
///   json_value!(true)           → Json::Bool(true)
///   json_value!(42)             → Json::Number(42.0)
///   json_value!("hello")        → Json::String(Rc::from("hello"))
///   json_value!([1, 2, 3])      → Json::Array(Rc::new(vec![...]))
///   json_value!({"k": v, ...})  → Json::Object(Rc::new(IndexMap from pairs))
///   json_value!(expr)           → Json::from(expr)
#[macro_export]
macro_rules! json_value {
    (null) => {
        $crate::value::Json::Null
    };

    (true) => {
        $crate::value::Json::Bool(true)
    };

    (false) => {
        $crate::value::Json::Bool(false)
    };

    ([ $($elem:tt),* $(,)? ]) => {
        $crate::value::Json::Array(std::rc::Rc::new(vec![ $( $crate::json_value!($elem) ),* ]))
    };

    ({ $($key:tt : $val:tt),* $(,)? }) => {
        {
            let mut map = indexmap::IndexMap::new();
            $(
                map.insert(($key).to_string(), $crate::json_value!($val));
            )*
            $crate::value::Json::Object(std::rc::Rc::new(map))
        }
    };

    ($other:expr) => {
        $crate::value::Json::from($other)
    };
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_is_cheap() {
        let arr = Json::array(vec![Json::from(1i64), Json::from(2i64)]);
        let arr2 = arr.clone();
        if let (Json::Array(a), Json::Array(b)) = (&arr, &arr2) {
            assert!(Rc::ptr_eq(a, b));
        } else {
            panic!("expected arrays");
        }

        let s = Json::string("hello");
        let s2 = s.clone();
        if let (Json::String(a), Json::String(b)) = (&s, &s2) {
            assert!(Rc::ptr_eq(a, b));
        } else {
            panic!("expected strings");
        }
    }

    #[test]
    fn test_type_tags() {
        assert_eq!(Json::Null.json_type(), JsonType::Null);
        assert_eq!(Json::Bool(false).json_type(), JsonType::False);
        assert_eq!(Json::Bool(true).json_type(), JsonType::True);
        assert_eq!(Json::Number(1.0).json_type().to_string(), "Number");
        assert_eq!(Json::array(vec![]).json_type().to_string(), "Array");
        assert_eq!(Json::Bool(true).type_name(), "boolean");
    }

    #[test]
    fn test_truthiness() {
        assert!(!Json::Null.is_truthy());
        assert!(!Json::Bool(false).is_truthy());
        assert!(Json::Number(0.0).is_truthy());
        assert!(Json::string("").is_truthy());
    }

    #[test]
    fn test_default_order_of_mixed_values() {
        let mut values = vec![
            json_value!(3),
            json_value!([]),
            json_value!("4"),
            json_value!({}),
            json_value!(true),
            json_value!(false),
            json_value!(null),
        ];
        values.sort();
        let sorted = Json::array(values);
        assert_eq!(sorted.to_string(), r#"[null,false,true,3,"4",[],{}]"#);
    }

    #[test]
    fn test_object_order_uses_sorted_keys() {
        let a = json_value!({"a": 2});
        let b = json_value!({"b": 1});
        assert!(a < b);
        let c = json_value!({"a": 1, "b": 5});
        let d = json_value!({"b": 5, "a": 2});
        assert!(c < d);
    }

    #[test]
    fn test_deep_equality_ignores_key_order() {
        let a = json_value!({"x": 1, "y": [1, 2]});
        let b = json_value!({"y": [1, 2], "x": 1});
        assert_eq!(a, b);
        assert_ne!(json_value!(1), json_value!("1"));
    }

    #[test]
    fn test_nan_equals_nothing() {
        let nan = Json::Number(f64::NAN);
        assert_eq!(nan, nan.clone());
        assert!(!nan.equals(&nan));
        assert!(!Json::array(vec![nan.clone()]).equals(&Json::array(vec![nan.clone()])));
        assert!(json_value!({"a": [1, 2]}).equals(&json_value!({"a": [1, 2]})));
        assert!(!json_value!(1).equals(&json_value!("1")));
    }

    #[test]
    fn test_number_formatting() {
        assert_eq!(format_number(2.0), "2");
        assert_eq!(format_number(1.5), "1.5");
        assert_eq!(format_number(-0.25), "-0.25");
        assert_eq!(format_number(f64::NAN), "null");
        assert_eq!(format_number(1e100), "1e100");
    }

    #[test]
    fn test_display_escapes() {
        let v = Json::string("a\"b\n");
        assert_eq!(v.to_string(), r#""a\"b\n""#);
    }

    #[test]
    fn test_serde_roundtrip() {
        let v = json_value!({"name": "Alice", "scores": [1, 2, 3], "active": true});
        let json_str = serde_json::to_string(&v).unwrap();
        let parsed = Json::from_json_str(&json_str).unwrap();
        assert_eq!(v, parsed);
    }

    #[test]
    fn test_from_serde_json() {
        let sv = serde_json::json!({"name": "Alice", "age": 30});
        let jv = Json::from(sv);
        assert_eq!(jv.get("name").and_then(|v| v.as_str()), Some("Alice"));
        assert_eq!(jv.get("age").and_then(|v| v.as_f64()), Some(30.0));
    }

    #[test]
    fn test_make_mut_copies_shared_storage() {
        let mut arr = Json::array(vec![Json::from(1i64), Json::from(2i64)]);
        let arr2 = arr.clone();
        if let Json::Array(items) = &mut arr {
            Rc::make_mut(items).push(Json::from(3i64));
        }
        assert_eq!(arr.to_string(), "[1,2,3]");
        assert_eq!(arr2.to_string(), "[1,2]");
    }

    #[test]
    fn test_undefined_sorts_first_and_prints_as_null() {
        assert!(Json::Undefined < Json::Null);
        assert_eq!(Json::Undefined.json_type().to_string(), "Undefined");
        assert_eq!(Json::Undefined.type_name(), "null");
        assert!(!Json::Undefined.is_truthy());
        assert_eq!(serde_json::to_string(&Json::Undefined).unwrap(), "null");
    }
}
