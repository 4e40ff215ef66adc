//! YAML form of BYML documents. Plain scalars map to the 32-bit node types;
//! the wider and unsigned types carry a tag.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_yaml::{Mapping, Value};

use super::Byml;
use crate::text::{f32_value, tag_name, tagged, to_f32};
use crate::{Error, Result};

fn schema(message: impl Into<String>) -> Error {
    Error::schema("BYML", message)
}

fn to_value(node: &Byml) -> Value {
    match node {
        Byml::Null => Value::Null,
        Byml::String(s) => Value::String(s.clone()),
        Byml::Binary(data) => tagged("binary", Value::String(STANDARD.encode(data))),
        Byml::Array(items) => Value::Sequence(items.iter().map(to_value).collect()),
        Byml::Hash(map) => Value::Mapping(
            map.iter()
                .map(|(k, v)| (Value::String(k.clone()), to_value(v)))
                .collect::<Mapping>(),
        ),
        Byml::Bool(b) => Value::Bool(*b),
        Byml::Int(i) => Value::Number((*i).into()),
        Byml::Float(f) => f32_value(*f),
        Byml::UInt(u) => tagged("u", Value::Number((*u).into())),
        Byml::Int64(i) => tagged("l", Value::Number((*i).into())),
        Byml::UInt64(u) => tagged("ul", Value::Number((*u).into())),
        Byml::Double(d) => tagged("f64", Value::Number((*d).into())),
    }
}

pub fn to_text(doc: &Byml) -> Result<String> {
    Ok(serde_yaml::to_string(&to_value(doc))?)
}

fn key_string(key: &Value) -> Result<String> {
    match key {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(schema(format!("hash keys must be scalars, found {other:?}"))),
    }
}

fn from_value(value: &Value) -> Result<Byml> {
    Ok(match value {
        Value::Null => Byml::Null,
        Value::Bool(b) => Byml::Bool(*b),
        Value::String(s) => Byml::String(s.clone()),
        Value::Number(n) if n.is_f64() => Byml::Float(to_f32(n.as_f64().unwrap_or_default())),
        Value::Number(n) => Byml::Int(
            n.as_i64()
                .and_then(|i| i32::try_from(i).ok())
                .ok_or_else(|| schema(format!("{n} does not fit a 32-bit int; tag it !l or !ul")))?,
        ),
        Value::Sequence(items) => Byml::Array(items.iter().map(from_value).collect::<Result<_>>()?),
        Value::Mapping(map) => Byml::Hash(
            map.iter()
                .map(|(k, v)| Ok((key_string(k)?, from_value(v)?)))
                .collect::<Result<_>>()?,
        ),
        Value::Tagged(t) => {
            let inner = &t.value;
            let name = tag_name(&t.tag);
            let bad = || schema(format!("invalid value for !{name}: {inner:?}"));
            match name.as_str() {
                "u" => Byml::UInt(
                    inner
                        .as_u64()
                        .and_then(|u| u32::try_from(u).ok())
                        .ok_or_else(bad)?,
                ),
                "l" => Byml::Int64(inner.as_i64().ok_or_else(bad)?),
                "ul" => Byml::UInt64(inner.as_u64().ok_or_else(bad)?),
                "f64" => Byml::Double(inner.as_f64().ok_or_else(bad)?),
                "binary" => Byml::Binary(
                    inner
                        .as_str()
                        .and_then(|s| STANDARD.decode(s).ok())
                        .ok_or_else(bad)?,
                ),
                other => return Err(schema(format!("unknown tag !{other}"))),
            }
        }
    })
}

pub fn from_text(text: &str) -> Result<Byml> {
    let value: Value = serde_yaml::from_str(text)?;
    let doc = from_value(&value)?;
    if !matches!(doc, Byml::Null | Byml::Array(_) | Byml::Hash(_)) {
        return Err(schema("the document root must be a mapping, a sequence or null"));
    }
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::byml::tests::sample;
    use crate::ErrorKind;
    use pretty_assertions::assert_eq;

    #[test]
    fn text_round_trip() {
        let doc = sample();
        let text = to_text(&doc).unwrap();
        assert!(text.contains("hp: -3"));
        assert!(text.contains("scale: 1.5"));
        assert!(text.contains("!u 4294967295"));
        assert!(text.contains("!binary AQIDBAU="));
        assert_eq!(from_text(&text).unwrap(), doc);
    }

    #[test]
    fn plain_scalars_pick_32_bit_types() {
        let doc = from_text("a: 1\nb: 2.0\nc: !l 5\nd: ~\n'7': x\n").unwrap();
        assert_eq!(doc.get("a"), Some(&Byml::Int(1)));
        assert_eq!(doc.get("b"), Some(&Byml::Float(2.0)));
        assert_eq!(doc.get("c"), Some(&Byml::Int64(5)));
        assert_eq!(doc.get("d"), Some(&Byml::Null));
        assert_eq!(doc.get("7"), Some(&Byml::String("x".into())));
    }

    #[test]
    fn schema_and_syntax_errors() {
        assert_eq!(
            from_text("a: 5000000000\n").unwrap_err().kind(),
            ErrorKind::SchemaMismatch
        );
        assert_eq!(
            from_text("a: !nope 1\n").unwrap_err().kind(),
            ErrorKind::SchemaMismatch
        );
        assert_eq!(from_text("42\n").unwrap_err().kind(), ErrorKind::SchemaMismatch);
        let err = from_text("a: [1,\n").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidSyntax);
        assert!(err.location().is_some());
    }
}
