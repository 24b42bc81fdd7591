use crate::error::ValidationErrors;
use crate::filter::values_equal;
use crate::schema::{Schema, SchemaType};
use serde_json::Value;

/// How strictly a value is checked against a schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    /// Every constraint applies (inserts).
    Full,
    /// The top-level `required` list is ignored (partial updates).
    Partial,
}

/// Schema validation capability injected into every collection.
///
/// Implementations must not retain per-schema state between calls: the
/// same schema may be validated concurrently from several collections.
pub trait Validator: Send + Sync {
    fn validate(
        &self,
        schema: &Schema,
        value: &Value,
        mode: ValidationMode,
    ) -> Result<(), ValidationErrors>;
}

/// The built-in validator for the JSON-Schema subset described by [`Schema`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaValidator;

impl Validator for SchemaValidator {
    fn validate(
        &self,
        schema: &Schema,
        value: &Value,
        mode: ValidationMode,
    ) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        match mode {
            ValidationMode::Full => validate_value(schema, value, "", &mut errors),
            ValidationMode::Partial => {
                validate_value(&schema.without_required(), value, "", &mut errors)
            }
        }
        errors.into_result()
    }
}

/// Validate `value` against `schema`, collecting every issue under `path`.
pub fn validate_value(schema: &Schema, value: &Value, path: &str, errors: &mut ValidationErrors) {
    if let Some(type_spec) = &schema.schema_type {
        let types = type_spec.types();
        if !types.iter().any(|ty| matches_type(*ty, value)) {
            let expected: Vec<&str> = types.iter().map(|ty| ty.name()).collect();
            errors.push(
                path,
                format!("expected {}, got {}", expected.join(" or "), type_name(value)),
            );
            return;
        }
    }

    if let Some(allowed) = &schema.enum_values {
        if !allowed.iter().any(|candidate| values_equal(candidate, value)) {
            errors.push(path, format!("value {value} is not one of {}", render_list(allowed)));
        }
    }

    match value {
        Value::Number(n) => {
            if let Some(v) = n.as_f64() {
                if let Some(min) = schema.minimum {
                    if v < min {
                        errors.push(path, format!("{v} is less than the minimum of {min}"));
                    }
                }
                if let Some(max) = schema.maximum {
                    if v > max {
                        errors.push(path, format!("{v} is greater than the maximum of {max}"));
                    }
                }
            }
        }
        Value::String(s) => {
            let len = s.chars().count();
            if let Some(min) = schema.min_length {
                if len < min {
                    errors.push(path, format!("must be at least {min} characters long"));
                }
            }
            if let Some(max) = schema.max_length {
                if len > max {
                    errors.push(path, format!("must be at most {max} characters long"));
                }
            }
        }
        Value::Array(items) => {
            if let Some(item_schema) = &schema.items {
                for (i, item) in items.iter().enumerate() {
                    validate_value(item_schema, item, &format!("{path}[{i}]"), errors);
                }
            }
        }
        Value::Object(map) => {
            for field in &schema.required {
                if !map.contains_key(field) {
                    errors.push(path, format!("required field '{field}' is missing"));
                }
            }

            for (field, field_value) in map {
                let field_path = format!("{path}.{field}");
                match schema.properties.get(field) {
                    Some(field_schema) => {
                        validate_value(field_schema, field_value, &field_path, errors)
                    }
                    None if schema.additional_properties == Some(false) => {
                        errors.push(field_path, "unexpected field (additionalProperties is false)");
                    }
                    None => {}
                }
            }
        }
        Value::Null | Value::Bool(_) => {}
    }
}

fn matches_type(ty: SchemaType, value: &Value) -> bool {
    match ty {
        SchemaType::String => value.is_string(),
        SchemaType::Number => value.is_number(),
        SchemaType::Integer => match value {
            Value::Number(n) => {
                n.is_i64() || n.is_u64() || n.as_f64().map(|f| f.fract() == 0.0).unwrap_or(false)
            }
            _ => false,
        },
        SchemaType::Boolean => value.is_boolean(),
        SchemaType::Object => value.is_object(),
        SchemaType::Array => value.is_array(),
        SchemaType::Null => value.is_null(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn render_list(values: &[Value]) -> String {
    let parts: Vec<String> = values.iter().map(|v| v.to_string()).collect();
    format!("[{}]", parts.join(", "))
}
