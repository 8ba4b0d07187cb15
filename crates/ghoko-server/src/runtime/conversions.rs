//! JSON <-> JavaScript Value Conversions
//!
//! Parameters enter scripts as JSON and host callables exchange JSON with
//! the engine, so both directions are needed.
//!
//! | JSON Type | JavaScript Type |
//! |-----------|-----------------|
//! | null | null |
//! | boolean | Boolean |
//! | number | Number |
//! | string | String |
//! | array | Array |
//! | object | Object |
//!
//! `undefined`, symbols and functions become JSON `null`; symbol keys are
//! skipped. Whole numbers convert back to JSON integers.

use boa_engine::{
    object::{builtins::JsArray, JsObject},
    property::PropertyKey,
    value::JsValue,
    Context, JsString,
};
use ghoko_common::{GhokoError, Result};
use serde_json::Value as JsonValue;

/// Largest integer a JavaScript number represents exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Convert serde_json::Value to Boa JsValue.
pub fn json_to_js_value(json: JsonValue, ctx: &mut Context) -> Result<JsValue> {
    match json {
        JsonValue::Null => Ok(JsValue::null()),
        JsonValue::Bool(b) => Ok(JsValue::new(b)),
        JsonValue::Number(n) => n
            .as_f64()
            .map(JsValue::new)
            .ok_or_else(|| GhokoError::ScriptExecution("Number out of range".into())),
        JsonValue::String(s) => Ok(JsValue::new(JsString::from(s))),
        JsonValue::Array(arr) => {
            let js_array = JsArray::new(ctx);
            for (i, v) in arr.into_iter().enumerate() {
                let js_value = json_to_js_value(v, ctx)?;
                js_array.push(js_value, ctx).map_err(|e| {
                    GhokoError::ScriptExecution(format!("Failed to push array element {}: {}", i, e))
                })?;
            }
            Ok(js_array.into())
        }
        JsonValue::Object(obj) => {
            let js_obj = JsObject::with_object_proto(ctx.intrinsics());

            for (key, value) in obj {
                let js_value = json_to_js_value(value, ctx)?;
                js_obj
                    .create_data_property_or_throw(JsString::from(key.as_str()), js_value, ctx)
                    .map_err(|e| {
                        GhokoError::ScriptExecution(format!("Failed to set property '{}': {}", key, e))
                    })?;
            }

            Ok(js_obj.into())
        }
    }
}

/// Convert Boa JsValue to serde_json::Value.
pub fn js_value_to_json(value: JsValue, ctx: &mut Context) -> Result<JsonValue> {
    if value.is_undefined() || value.is_null() || value.is_symbol() {
        return Ok(JsonValue::Null);
    }

    if let Some(b) = value.as_boolean() {
        return Ok(JsonValue::Bool(b));
    }

    if let Some(n) = value.as_number() {
        return Ok(number_to_json(n));
    }

    if value.is_string() {
        let s = value
            .to_string(ctx)
            .map_err(|e| GhokoError::ScriptExecution(format!("String conversion error: {}", e)))?;
        return Ok(JsonValue::String(s.to_std_string_escaped()));
    }

    if value.is_callable() {
        return Ok(JsonValue::Null);
    }

    if let Some(obj) = value.as_object() {
        if obj.is_array() {
            let array = JsArray::from_object(obj.clone())
                .map_err(|e| GhokoError::ScriptExecution(format!("Object is not a valid array: {}", e)))?;

            let length = array
                .length(ctx)
                .map_err(|e| GhokoError::ScriptExecution(format!("Failed to get array length: {}", e)))?;
            let length = u32::try_from(length)
                .map_err(|_| GhokoError::ScriptExecution("Array length overflow".into()))?;

            let mut result = Vec::with_capacity(length as usize);
            for i in 0..length {
                let elem = array.get(i, ctx).map_err(|e| {
                    GhokoError::ScriptExecution(format!("Failed to get array element {}: {}", i, e))
                })?;
                result.push(js_value_to_json(elem, ctx)?);
            }
            return Ok(JsonValue::Array(result));
        }

        let keys = obj
            .own_property_keys(ctx)
            .map_err(|e| GhokoError::ScriptExecution(format!("Failed to get object keys: {}", e)))?;

        let mut result = serde_json::Map::new();
        for key in keys {
            if matches!(key, PropertyKey::Symbol(_)) {
                continue;
            }
            let key_str = key.to_string();
            let prop_value = obj.get(key, ctx).map_err(|e| {
                GhokoError::ScriptExecution(format!("Failed to get property '{}': {}", key_str, e))
            })?;
            result.insert(key_str, js_value_to_json(prop_value, ctx)?);
        }

        return Ok(JsonValue::Object(result));
    }

    Ok(JsonValue::Null)
}

fn number_to_json(n: f64) -> JsonValue {
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        return JsonValue::Number((n as i64).into());
    }
    // NaN and infinities have no JSON form.
    serde_json::Number::from_f64(n)
        .map(JsonValue::Number)
        .unwrap_or(JsonValue::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use boa_engine::Source;
    use serde_json::json;

    fn round_trip(value: JsonValue) -> JsonValue {
        let mut ctx = Context::default();
        let js = json_to_js_value(value, &mut ctx).unwrap();
        js_value_to_json(js, &mut ctx).unwrap()
    }

    #[test]
    fn test_webhook_payload_survives_conversion() {
        let payload = json!({
            "ref": "refs/heads/main",
            "commits": [{"id": "abc123", "added": ["README.md"]}],
            "forced": false,
            "size": 3,
            "ratio": 0.5,
            "pusher": null
        });
        assert_eq!(round_trip(payload.clone()), payload);
    }

    #[test]
    fn test_whole_numbers_become_integers() {
        let mut ctx = Context::default();
        let value = ctx.eval(Source::from_bytes("1 + 2")).unwrap();
        assert_eq!(js_value_to_json(value, &mut ctx).unwrap(), json!(3));
    }

    #[test]
    fn test_undefined_and_functions_become_null() {
        let mut ctx = Context::default();
        let undefined = ctx.eval(Source::from_bytes("undefined")).unwrap();
        assert_eq!(js_value_to_json(undefined, &mut ctx).unwrap(), JsonValue::Null);

        let func = ctx.eval(Source::from_bytes("(function () {})")).unwrap();
        assert_eq!(js_value_to_json(func, &mut ctx).unwrap(), JsonValue::Null);
    }

    #[test]
    fn test_nan_becomes_null() {
        let mut ctx = Context::default();
        let nan = ctx.eval(Source::from_bytes("0 / 0")).unwrap();
        assert_eq!(js_value_to_json(nan, &mut ctx).unwrap(), JsonValue::Null);
    }

    #[test]
    fn test_object_built_in_script() {
        let mut ctx = Context::default();
        let value = ctx
            .eval(Source::from_bytes(r#"({ status: "ok", tags: ["a", "b"], nested: { n: 1.5 } })"#))
            .unwrap();
        assert_eq!(
            js_value_to_json(value, &mut ctx).unwrap(),
            json!({"status": "ok", "tags": ["a", "b"], "nested": {"n": 1.5}})
        );
    }
}
