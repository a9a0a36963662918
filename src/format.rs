// String formats
// `@text`, `@json`, `@csv` and friends, applied to a value or to every
// interpolation of a format string.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::{EvalError, EvalResult};
use crate::value::Json;

/// Plain text rendering: strings as-is, everything else as compact JSON.
pub fn text(value: &Json) -> String {
    match value {
        Json::String(s) => s.to_string(),
        other => other.to_string(),
    }
}

/// Apply the format called `name` (without the `@`).
pub fn apply(name: &str, value: &Json) -> EvalResult<String> {
    match name {
        "text" => Ok(text(value)),
        "json" => Ok(value.to_string()),
        "html" => Ok(html(&text(value))),
        "uri" => Ok(uri(&text(value))),
        "csv" => csv(value),
        "tsv" => tsv(value),
        "sh" => sh(value),
        "base64" => Ok(STANDARD.encode(text(value))),
        "base64d" => base64_decode(&text(value)),
        _ => Err(EvalError::lookup(format!("{} is not a valid format.", name))),
    }
}

fn html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '\'' => out.push_str("&#39;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}

fn uri(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~') {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

fn row<'a>(value: &'a Json, format: &str) -> EvalResult<&'a [Json]> {
    match value {
        Json::Array(items) => Ok(items.as_slice()),
        other => Err(EvalError::type_error(
            format!("{} cannot be {}-formatted, only an array can be.", other.json_type(), format),
            vec![other.clone()],
        )),
    }
}

fn invalid_cell(value: &Json, format: &str) -> EvalError {
    EvalError::type_error(
        format!("{} is not valid in a {} row.", value.json_type(), format),
        vec![value.clone()],
    )
}

fn csv(value: &Json) -> EvalResult<String> {
    let cells = row(value, "csv")?
        .iter()
        .map(|cell| match cell {
            Json::Null => Ok(String::new()),
            Json::Bool(_) | Json::Number(_) => Ok(cell.to_string()),
            Json::String(s) => Ok(format!("\"{}\"", s.replace('"', "\"\""))),
            other => Err(invalid_cell(other, "csv")),
        })
        .collect::<EvalResult<Vec<String>>>()?;
    Ok(cells.join(","))
}

fn tsv(value: &Json) -> EvalResult<String> {
    let cells = row(value, "tsv")?
        .iter()
        .map(|cell| match cell {
            Json::Null => Ok(String::new()),
            Json::Bool(_) | Json::Number(_) => Ok(cell.to_string()),
            Json::String(s) => Ok(s
                .replace('\\', "\\\\")
                .replace('\t', "\\t")
                .replace('\n', "\\n")
                .replace('\r', "\\r")),
            other => Err(invalid_cell(other, "tsv")),
        })
        .collect::<EvalResult<Vec<String>>>()?;
    Ok(cells.join("\t"))
}

fn sh_word(value: &Json) -> EvalResult<String> {
    match value {
        Json::String(s) => Ok(format!("'{}'", s.replace('\'', "'\\''"))),
        Json::Array(_) | Json::Object(_) => Err(EvalError::type_error(
            format!("{} can not be escaped for shell.", value.json_type()),
            vec![value.clone()],
        )),
        other => Ok(other.to_string()),
    }
}

fn sh(value: &Json) -> EvalResult<String> {
    match value {
        Json::Array(items) => Ok(items.iter().map(sh_word).collect::<EvalResult<Vec<_>>>()?.join(" ")),
        other => sh_word(other),
    }
}

fn base64_decode(s: &str) -> EvalResult<String> {
    let trimmed = s.trim_end_matches('=');
    let padded = format!("{}{}", trimmed, "=".repeat((4 - trimmed.len() % 4) % 4));
    let bytes = STANDARD.decode(padded.as_bytes()).map_err(|e| {
        EvalError::type_error(
            format!("{} is not valid base64 data: {}", Json::from(s), e),
            vec![Json::from(s)],
        )
    })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
