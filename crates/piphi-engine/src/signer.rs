//! Payload signer
//!
//! Signatures are HMAC-SHA256 over a canonical JSON rendering: object keys
//! sorted, no whitespace, everything outside printable ASCII escaped as
//! `\uXXXX` (UTF-16 code units, lowercase hex), and floats written the way
//! Python's `json.dumps` writes them (`1.0`, `1e-05`, `1e+20`). Consumers
//! verify against exactly these bytes.

use std::fmt::Write;

use hmac::{Hmac, Mac};
use piphi_core::{AppliedConfig, EngineError, EngineResult};
use serde_json::Value;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Render `value` in canonical form
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() => write_float(out, f),
            _ => out.push_str(&n.to_string()),
        },
        Value::String(s) => write_string(out, s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(out, key);
                out.push(':');
                write_value(out, &map[key]);
            }
            out.push('}');
        }
    }
}

/// Shortest round-trip digits, positional for decimal exponents -4..16
fn write_float(out: &mut String, value: f64) {
    let scientific = format!("{value:e}");
    let (mantissa, exponent) = scientific.split_once('e').unwrap_or((&scientific, "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let (sign, mantissa) = match mantissa.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", mantissa),
    };
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();
    let point = exponent + 1;

    out.push_str(sign);
    if (-3..=16).contains(&point) {
        let len = digits.len() as i32;
        if point <= 0 {
            out.push_str("0.");
            out.extend(std::iter::repeat('0').take((-point) as usize));
            out.push_str(&digits);
        } else if point >= len {
            out.push_str(&digits);
            out.extend(std::iter::repeat('0').take((point - len) as usize));
            out.push_str(".0");
        } else {
            let (whole, fraction) = digits.split_at(point as usize);
            out.push_str(whole);
            out.push('.');
            out.push_str(fraction);
        }
    } else {
        let (first, rest) = digits.split_at(1);
        out.push_str(first);
        if !rest.is_empty() {
            out.push('.');
            out.push_str(rest);
        }
        let _ = write!(out, "e{}{:02}", if exponent < 0 { '-' } else { '+' }, exponent.abs());
    }
}

fn write_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0C}' => out.push_str("\\f"),
            ' '..='~' => out.push(c),
            _ => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    // writing to a String cannot fail
                    let _ = write!(out, "\\u{:04x}", unit);
                }
            }
        }
    }
    out.push('"');
}

/// HMAC-SHA256 of the canonical form of `payload`, as lowercase hex
pub fn sign(payload: &Value, secret: &str) -> EngineResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| EngineError::Internal(format!("HMAC key rejected: {e}")))?;
    mac.update(canonical_json(payload).as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Sign a configuration with its own secret
pub fn sign_config(config: &AppliedConfig) -> EngineResult<String> {
    sign(&config.to_value(), config.secret())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_reference_vector() {
        assert_eq!(
            sign(&json!({"a": 1, "b": 2}), "secret").unwrap(),
            "4d981323558769c45bb8eab870f683fb0220d1fdc150a3a31b4ea34c4af6dfb9"
        );
    }

    #[test]
    fn test_key_order_does_not_matter() {
        let forward: Value = serde_json::from_str(r#"{"a":1,"b":2}"#).unwrap();
        let reverse: Value = serde_json::from_str(r#"{"b":2,"a":1}"#).unwrap();
        assert_eq!(sign(&forward, "secret").unwrap(), sign(&reverse, "secret").unwrap());
    }

    #[test]
    fn test_value_change_changes_signature() {
        let changed = sign(&json!({"a": 1, "b": 3}), "secret").unwrap();
        assert_eq!(
            changed,
            "bc6a754f463dd0ccb2ccc87ba1f41a6d87854209a0d01d36a878e0aa696642c7"
        );
        assert_ne!(changed, sign(&json!({"a": 1, "b": 2}), "secret").unwrap());
        assert_ne!(changed, sign(&json!({"a": 1, "b": 3}), "other").unwrap());
    }

    #[test]
    fn test_canonical_form() {
        let value = json!({
            "z": [1, 2.5, null, true],
            "a": {"y": "line\nbreak", "b": "quote\"slash\\"},
        });
        assert_eq!(
            canonical_json(&value),
            r#"{"a":{"b":"quote\"slash\\","y":"line\nbreak"},"z":[1,2.5,null,true]}"#
        );
    }

    #[test]
    fn test_non_ascii_is_escaped() {
        assert_eq!(
            canonical_json(&json!({"name": "café"})),
            r#"{"name":"caf\u00e9"}"#
        );
        assert_eq!(canonical_json(&json!("🌡")), r#""\ud83c\udf21""#);
        assert_eq!(canonical_json(&json!("\u{7f}\u{1}")), r#""\u007f\u0001""#);
        assert_eq!(
            sign(&json!({"name": "café"}), "secret").unwrap(),
            "b5a773d6a1aeb4a8d9b8368d74b4d7a9af89f057778c51b15b38b299f007049a"
        );
    }

    #[test]
    fn test_floats_match_python_json() {
        let value = json!({"b": [1e20, 1e-5, 0.0001, 1.0, -0.0, 2.5, 1e16, 1e15, 123.456, 0.1]});
        assert_eq!(
            canonical_json(&value),
            r#"{"b":[1e+20,1e-05,0.0001,1.0,-0.0,2.5,1e+16,1000000000000000.0,123.456,0.1]}"#
        );
        assert_eq!(
            sign(&value, "secret").unwrap(),
            "813e892ff6dac7066a2da6ac35a4eb64dc59bc172016ec08d02ff9ef91534563"
        );
    }

    #[test]
    fn test_config_is_signed_as_posted() {
        let posted: AppliedConfig = serde_json::from_value(json!({
            "container_id": null,
            "id": "d1",
            "secret": "s",
            "usbpath": "/dev/ttyACM0"
        }))
        .unwrap();
        assert_eq!(
            sign_config(&posted).unwrap(),
            "96f62fb256ba6086699c89e921c1c7999c4cc697e9f4d60ab23484fd8b120cdb"
        );

        let with_threshold: AppliedConfig = serde_json::from_value(json!({
            "id": "d1",
            "secret": "s",
            "usbpath": "/dev/ttyACM0",
            "threshold": 1.0,
            "container_id": null
        }))
        .unwrap();
        assert_eq!(
            sign_config(&with_threshold).unwrap(),
            "2addbae1bb091b6b9c855ba6b7510a98d936a7c0c8c2ce6b41da09ddb6cfadf4"
        );
    }

    #[test]
    fn test_config_signature_covers_extra_fields() {
        let config = AppliedConfig::new("d1", "secret", "/dev/ttyACM0");
        let extended = config.clone().with_extra("sensor", json!("PMSA003I"));

        let base = sign_config(&config).unwrap();
        assert_eq!(base.len(), 64);
        assert_ne!(base, sign_config(&extended).unwrap());
        assert_eq!(
            base,
            sign(
                &json!({"id": "d1", "secret": "secret", "bus_path": "/dev/ttyACM0"}),
                "secret"
            )
            .unwrap()
        );
    }
}
