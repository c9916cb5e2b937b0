//! Decodes a `/post` payload — JSON or key:value — into a [`HijackPoint`]
//! (§6 "Payload parser variants").
//!
//! Both variants describe the same schema (`func`, `action`, `val`, optional
//! `index`) and must decode to identical envelopes for the same logical
//! request (§8 S6). The key:value form mirrors the source's `simple` parser
//! (`parser.go`'s `strings.Split` + `mapstructure.Decode`): split on commas,
//! then on the first `:` in each pair.

use serde::Deserialize;

use hijack_core::{ActionKind, HijackPoint, HijackValue};

/// Raised when a `/post` payload cannot be decoded into a [`HijackPoint`]
/// (§7 `ParseError`).
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// The payload was not valid JSON and not valid key:value text, or was
    /// valid as either but missing a required field.
    #[error("parse error")]
    Malformed,
    /// `action` named something other than `delay`/`panic`/`set`/`return`.
    #[error("parse error: unknown action {0:?}")]
    UnknownAction(String),
}

/// The wire shape shared by both payload variants, deserialized once by
/// `serde_json` for the JSON form and built up field-by-field for the
/// key:value form.
#[derive(Debug, Deserialize)]
struct RawPoint {
    func: String,
    action: String,
    #[serde(default)]
    val: serde_json::Value,
    #[serde(default)]
    index: Option<usize>,
}

/// Decode a JSON object payload (§6 variant (a)).
pub fn parse_json(payload: &str) -> Result<HijackPoint, ParseError> {
    let raw: RawPoint = serde_json::from_str(payload).map_err(|_| ParseError::Malformed)?;
    into_point(raw)
}

/// Decode a `k:v,k:v,...` payload (§6 variant (b)).
///
/// Each `val` is typed by sniffing the text: an integer literal becomes
/// `Int`, `true`/`false` becomes `Bool`, anything else is kept as `Str` —
/// the same coercion a JSON payload gets for free from `serde_json::Value`.
pub fn parse_kv(payload: &str) -> Result<HijackPoint, ParseError> {
    let mut func = None;
    let mut action = None;
    let mut val_text = None;
    let mut index = None;

    for pair in payload.split(',') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair.split_once(':').ok_or(ParseError::Malformed)?;
        let (key, value) = (key.trim(), value.trim());
        match key {
            "func" => func = Some(value.to_string()),
            "action" => action = Some(value.to_string()),
            "val" => val_text = Some(value.to_string()),
            "index" => index = Some(value.parse::<usize>().map_err(|_| ParseError::Malformed)?),
            _ => {}
        }
    }

    let raw = RawPoint {
        func: func.ok_or(ParseError::Malformed)?,
        action: action.ok_or(ParseError::Malformed)?,
        val: val_text.map(sniff_json_value).unwrap_or(serde_json::Value::Null),
        index,
    };
    into_point(raw)
}

/// Sniff a bare key:value string into the same `serde_json::Value` shape a
/// JSON payload would have produced, so both variants share one conversion
/// path (§8 S6 parser equivalence).
fn sniff_json_value(text: String) -> serde_json::Value {
    if let Ok(i) = text.parse::<i64>() {
        return serde_json::Value::from(i);
    }
    if let Ok(b) = text.parse::<bool>() {
        return serde_json::Value::from(b);
    }
    serde_json::Value::from(text)
}

fn into_point(raw: RawPoint) -> Result<HijackPoint, ParseError> {
    let action = ActionKind::parse(&raw.action).ok_or_else(|| ParseError::UnknownAction(raw.action.clone()))?;
    let val = json_to_hijack_value(&raw.val);
    Ok(HijackPoint {
        func: raw.func,
        action,
        val,
        index: raw.index,
    })
}

fn json_to_hijack_value(value: &serde_json::Value) -> HijackValue {
    match value {
        serde_json::Value::Bool(b) => HijackValue::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                HijackValue::Int(i)
            } else if let Some(u) = n.as_u64() {
                HijackValue::Uint(u)
            } else {
                HijackValue::Str(n.to_string())
            }
        }
        serde_json::Value::String(s) => HijackValue::Str(s.clone()),
        other => HijackValue::Str(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_and_kv_decode_to_identical_envelopes() {
        let json = parse_json(r#"{"func":"X","action":"delay","val":10}"#).unwrap();
        let kv = parse_kv("func:X,action:delay,val:10").unwrap();
        assert_eq!(json, kv);
    }

    #[test]
    fn json_missing_func_is_malformed() {
        let err = parse_json(r#"{"action":"delay","val":10}"#).unwrap_err();
        assert!(matches!(err, ParseError::Malformed));
    }

    #[test]
    fn kv_rejects_unknown_action() {
        let err = parse_kv("func:X,action:teleport,val:1").unwrap_err();
        assert!(matches!(err, ParseError::UnknownAction(_)));
    }

    #[test]
    fn kv_sniffs_bool_and_string_vals() {
        let point = parse_kv("func:X,action:panic,val:boom").unwrap();
        assert_eq!(point.val, HijackValue::Str("boom".into()));
    }

    #[test]
    fn kv_parses_index() {
        let point = parse_kv("func:X,action:set,val:1024,index:0").unwrap();
        assert_eq!(point.index, Some(0));
    }
}
