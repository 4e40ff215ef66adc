//! YAML form of parameter archives.
//!
//! ```yaml
//! !io
//! version: 0
//! type: xml
//! param_root: !list
//!   objects:
//!     Settings: !obj
//!       Speed: 1.5
//!       Count: !u 3
//!   lists: {}
//! ```

use serde_yaml::{Mapping, Value};

use super::{
    string_capacity, AampNames, Curve, Parameter, ParameterIO, ParameterList, ParameterObject,
};
use crate::text::{f32_value, tag_name, tagged, to_f32};
use crate::{Error, Result};

fn schema(message: impl Into<String>) -> Error {
    Error::schema("AAMP", message)
}

fn floats(values: &[f32]) -> Value {
    Value::Sequence(values.iter().map(|x| f32_value(*x)).collect())
}

fn key_value(hash: u32, names: &AampNames) -> Value {
    match names.get(hash) {
        Some(name) => Value::String(name.to_string()),
        None => Value::Number(hash.into()),
    }
}

fn param_to_value(param: &Parameter) -> Value {
    match param {
        Parameter::Bool(v) => Value::Bool(*v),
        Parameter::F32(v) => f32_value(*v),
        Parameter::Int(v) => Value::Number((*v).into()),
        Parameter::U32(v) => tagged("u", Value::Number((*v).into())),
        Parameter::Vec2(v) => tagged("vec2", floats(v)),
        Parameter::Vec3(v) => tagged("vec3", floats(v)),
        Parameter::Vec4(v) => tagged("vec4", floats(v)),
        Parameter::Color(v) => tagged("color", floats(v)),
        Parameter::Quat(v) => tagged("quat", floats(v)),
        Parameter::String32(s) => tagged("str32", Value::String(s.clone())),
        Parameter::String64(s) => tagged("str64", Value::String(s.clone())),
        Parameter::String256(s) => tagged("str256", Value::String(s.clone())),
        Parameter::StringRef(s) => Value::String(s.clone()),
        Parameter::Curve(curves) => tagged(
            "curve",
            Value::Sequence(
                curves
                    .iter()
                    .flat_map(|curve| {
                        [Value::Number(curve.a.into()), Value::Number(curve.b.into())]
                            .into_iter()
                            .chain(curve.floats.iter().map(|x| f32_value(*x)))
                    })
                    .collect(),
            ),
        ),
        Parameter::BufferInt(v) => tagged(
            "buffer_int",
            Value::Sequence(v.iter().map(|x| Value::Number((*x).into())).collect()),
        ),
        Parameter::BufferF32(v) => tagged("buffer_f32", floats(v)),
        Parameter::BufferU32(v) => tagged(
            "buffer_u32",
            Value::Sequence(v.iter().map(|x| Value::Number((*x).into())).collect()),
        ),
        Parameter::BufferBinary(v) => tagged("buffer_binary", Value::String(hex::encode(v))),
    }
}

fn list_to_value(list: &ParameterList, names: &AampNames) -> Value {
    let mut objects = Mapping::new();
    for (key, object) in &list.objects {
        let mut params = Mapping::new();
        for (name, param) in &object.0 {
            params.insert(key_value(*name, names), param_to_value(param));
        }
        objects.insert(key_value(*key, names), tagged("obj", Value::Mapping(params)));
    }
    let mut lists = Mapping::new();
    for (key, child) in &list.lists {
        lists.insert(key_value(*key, names), list_to_value(child, names));
    }
    let mut map = Mapping::new();
    map.insert("objects".into(), Value::Mapping(objects));
    map.insert("lists".into(), Value::Mapping(lists));
    tagged("list", Value::Mapping(map))
}

pub fn to_text(pio: &ParameterIO, names: &AampNames) -> Result<String> {
    let mut map = Mapping::new();
    map.insert("version".into(), Value::Number(pio.version.into()));
    map.insert("type".into(), pio.data_type.as_str().into());
    map.insert("param_root".into(), list_to_value(&pio.root, names));
    Ok(serde_yaml::to_string(&tagged("io", Value::Mapping(map)))?)
}

fn untag<'a>(value: &'a Value, tag: &str, what: &str) -> Result<&'a Value> {
    match value {
        Value::Tagged(t) if tag_name(&t.tag) == tag => Ok(&t.value),
        _ => Err(schema(format!("expected !{tag} for {what}"))),
    }
}

fn mapping<'a>(value: &'a Value, what: &str) -> Result<&'a Mapping> {
    value
        .as_mapping()
        .ok_or_else(|| schema(format!("{what} must be a mapping")))
}

fn sequence<'a>(value: &'a Value, what: &str) -> Result<&'a [Value]> {
    value
        .as_sequence()
        .map(Vec::as_slice)
        .ok_or_else(|| schema(format!("!{what} must be a sequence")))
}

fn string(value: &Value, what: &str) -> Result<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| schema(format!("!{what} must be a string")))
}

fn parse_key(key: &Value, names: &mut AampNames) -> Result<u32> {
    match key {
        Value::String(name) => Ok(names.learn(name)),
        Value::Number(n) => n
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| schema(format!("key {n} is not a valid hash"))),
        other => Err(schema(format!("invalid key {other:?}"))),
    }
}

fn parse_f32(value: &Value) -> Result<f32> {
    let wide = value
        .as_f64()
        .ok_or_else(|| schema(format!("expected a number, found {value:?}")))?;
    Ok(to_f32(wide))
}

fn parse_int(value: &Value) -> Result<i32> {
    value
        .as_i64()
        .and_then(|n| i32::try_from(n).ok())
        .ok_or_else(|| schema(format!("expected a 32-bit integer, found {value:?}")))
}

fn parse_u32(value: &Value) -> Result<u32> {
    value
        .as_u64()
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| schema(format!("expected an unsigned 32-bit integer, found {value:?}")))
}

fn float_array<const N: usize>(value: &Value, tag: &str) -> Result<[f32; N]> {
    let items = sequence(value, tag)?;
    if items.len() != N {
        return Err(schema(format!("!{tag} needs {N} values, found {}", items.len())));
    }
    let mut out = [0f32; N];
    for (slot, item) in out.iter_mut().zip(items) {
        *slot = parse_f32(item)?;
    }
    Ok(out)
}

fn parse_curves(value: &Value) -> Result<Vec<Curve>> {
    let items = sequence(value, "curve")?;
    if items.is_empty() || items.len() % 32 != 0 || items.len() > 4 * 32 {
        return Err(schema(format!(
            "!curve needs 32 values per curve (1 to 4 curves), found {}",
            items.len()
        )));
    }
    items
        .chunks(32)
        .map(|chunk| {
            let mut curve = Curve {
                a: parse_u32(&chunk[0])?,
                b: parse_u32(&chunk[1])?,
                ..Curve::default()
            };
            for (slot, item) in curve.floats.iter_mut().zip(&chunk[2..]) {
                *slot = parse_f32(item)?;
            }
            Ok(curve)
        })
        .collect()
}

fn fixed(value: &Value, tag: &str, type_id: u8) -> Result<String> {
    let s = string(value, tag)?;
    match string_capacity(type_id) {
        Some(capacity) if s.len() >= capacity => Err(schema(format!(
            "!{tag} holds at most {} bytes, got {}",
            capacity - 1,
            s.len()
        ))),
        _ => Ok(s),
    }
}

fn value_to_param(value: &Value) -> Result<Parameter> {
    Ok(match value {
        Value::Bool(b) => Parameter::Bool(*b),
        Value::Number(n) if n.is_f64() => Parameter::F32(parse_f32(value)?),
        Value::Number(_) => Parameter::Int(parse_int(value)?),
        Value::String(s) => Parameter::StringRef(s.clone()),
        Value::Tagged(t) => {
            let inner = &t.value;
            match tag_name(&t.tag).as_str() {
                "u" => Parameter::U32(parse_u32(inner)?),
                "vec2" => Parameter::Vec2(float_array(inner, "vec2")?),
                "vec3" => Parameter::Vec3(float_array(inner, "vec3")?),
                "vec4" => Parameter::Vec4(float_array(inner, "vec4")?),
                "color" => Parameter::Color(float_array(inner, "color")?),
                "quat" => Parameter::Quat(float_array(inner, "quat")?),
                "str32" => Parameter::String32(fixed(inner, "str32", 7)?),
                "str64" => Parameter::String64(fixed(inner, "str64", 8)?),
                "str256" => Parameter::String256(fixed(inner, "str256", 15)?),
                "curve" => Parameter::Curve(parse_curves(inner)?),
                "buffer_int" => Parameter::BufferInt(
                    sequence(inner, "buffer_int")?
                        .iter()
                        .map(parse_int)
                        .collect::<Result<_>>()?,
                ),
                "buffer_f32" => Parameter::BufferF32(
                    sequence(inner, "buffer_f32")?
                        .iter()
                        .map(parse_f32)
                        .collect::<Result<_>>()?,
                ),
                "buffer_u32" => Parameter::BufferU32(
                    sequence(inner, "buffer_u32")?
                        .iter()
                        .map(parse_u32)
                        .collect::<Result<_>>()?,
                ),
                "buffer_binary" => Parameter::BufferBinary(
                    hex::decode(string(inner, "buffer_binary")?)
                        .map_err(|e| schema(format!("!buffer_binary: {e}")))?,
                ),
                other => return Err(schema(format!("unknown parameter tag !{other}"))),
            }
        }
        other => return Err(schema(format!("unsupported parameter value {other:?}"))),
    })
}

fn parse_object(value: &Value, names: &mut AampNames) -> Result<ParameterObject> {
    let params = mapping(untag(value, "obj", "a parameter object")?, "!obj")?;
    let mut object = ParameterObject::default();
    for (key, param) in params {
        object.0.push((parse_key(key, names)?, value_to_param(param)?));
    }
    Ok(object)
}

fn parse_list(value: &Value, names: &mut AampNames) -> Result<ParameterList> {
    let map = mapping(untag(value, "list", "a parameter list")?, "!list")?;
    let mut list = ParameterList::default();
    for key in map.keys() {
        if !matches!(key.as_str(), Some("objects" | "lists")) {
            return Err(schema(format!("unexpected list field {key:?}")));
        }
    }
    if let Some(objects) = map.get("objects") {
        for (key, object) in mapping(objects, "objects")? {
            list.objects.push((parse_key(key, names)?, parse_object(object, names)?));
        }
    }
    if let Some(lists) = map.get("lists") {
        for (key, child) in mapping(lists, "lists")? {
            list.lists.push((parse_key(key, names)?, parse_list(child, names)?));
        }
    }
    Ok(list)
}

/// Parses the YAML form. Every string key is remembered in `names`.
pub fn from_text(text: &str, names: &mut AampNames) -> Result<ParameterIO> {
    let value: Value = serde_yaml::from_str(text)?;
    let map = mapping(untag(&value, "io", "the document root")?, "!io")?;
    let version = match map.get("version") {
        Some(v) => parse_u32(v)?,
        None => 0,
    };
    let data_type = match map.get("type") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => return Err(schema(format!("type must be a string, found {other:?}"))),
        None => "xml".to_string(),
    };
    let root = map
        .get("param_root")
        .ok_or_else(|| schema("missing param_root"))?;
    Ok(ParameterIO {
        version,
        data_type,
        root: parse_list(root, names)?,
    })
}
