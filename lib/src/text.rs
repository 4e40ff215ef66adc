//! Small helpers shared by the YAML forms of the structured formats.

use serde_yaml::value::{Tag, TaggedValue};
use serde_yaml::{Number, Value};

pub(crate) fn tagged(tag: &str, value: Value) -> Value {
    Value::Tagged(Box::new(TaggedValue {
        tag: Tag::new(tag),
        value,
    }))
}

/// Tag name without the leading `!`.
pub(crate) fn tag_name(tag: &Tag) -> String {
    tag.to_string().trim_start_matches('!').to_string()
}

/// Shortest decimal that reads back as the same f32, so the text carries no f64 noise.
pub(crate) fn f32_value(x: f32) -> Value {
    let wide = format!("{x}").parse::<f64>().unwrap_or(x as f64);
    Value::Number(Number::from(wide))
}

pub(crate) fn to_f32(wide: f64) -> f32 {
    wide.to_string().parse::<f32>().unwrap_or(wide as f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn f32_text_is_short_and_exact() {
        for x in [0.1f32, 1.0, -3.25, 1e-7, 123456.79, f32::MAX] {
            let value = f32_value(x);
            let text = serde_yaml::to_string(&value).unwrap();
            assert!(text.len() < 16, "{text}");
            let back: Value = serde_yaml::from_str(&text).unwrap();
            assert_eq!(to_f32(back.as_f64().unwrap()), x);
        }
    }

    #[test]
    fn tag_names_drop_the_bang() {
        assert_eq!(tag_name(&Tag::new("u")), "u");
        let parsed: Value = serde_yaml::from_str("!vec3 [1, 2, 3]").unwrap();
        match parsed {
            Value::Tagged(t) => assert_eq!(tag_name(&t.tag), "vec3"),
            other => panic!("not tagged: {other:?}"),
        }
    }
}
