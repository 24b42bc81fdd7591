use super::types::Schema;
use crate::error::Result;
use std::path::Path;

/// Parse a schema file. YAML is a superset of JSON, so both `.json` and
/// `.yaml` schema files go through the same parser.
pub fn parse_schema(path: &Path) -> Result<Schema> {
    let content = std::fs::read_to_string(path)?;
    parse_schema_str(&content)
}

/// Parse a schema from a YAML or JSON string.
pub fn parse_schema_str(content: &str) -> Result<Schema> {
    let schema: Schema = serde_yaml::from_str(content)?;
    Ok(schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{SchemaType, TypeSpec};
    use serde_json::json;

    #[test]
    fn test_parse_json_schema() {
        let schema = parse_schema_str(
            r#"{
                "type": "object",
                "properties": {
                    "name": { "type": "string", "minLength": 1 },
                    "age": { "type": ["integer", "null"] }
                },
                "required": ["name"],
                "additionalProperties": false,
                "default": { "age": null }
            }"#,
        )
        .unwrap();

        assert_eq!(schema.schema_type, Some(TypeSpec::Single(SchemaType::Object)));
        assert_eq!(schema.required, vec!["name".to_string()]);
        assert_eq!(schema.additional_properties, Some(false));
        assert_eq!(schema.properties["name"].min_length, Some(1));
        assert_eq!(
            schema.properties["age"].schema_type.as_ref().unwrap().types(),
            &[SchemaType::Integer, SchemaType::Null]
        );
        assert_eq!(schema.default, Some(json!({ "age": null })));
    }

    #[test]
    fn test_parse_yaml_schema() {
        let schema = parse_schema_str(
            r#"
type: object
properties:
  role: { type: string, enum: [admin, member], default: member }
required: [role]
"#,
        )
        .unwrap();

        assert_eq!(
            schema.properties["role"].enum_values,
            Some(vec![json!("admin"), json!("member")])
        );
        assert_eq!(schema.record_defaults()["role"], json!("member"));
    }

    #[test]
    fn test_parse_schema_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("users.json");
        std::fs::write(&path, r#"{ "type": "object", "required": ["email"] }"#).unwrap();

        let schema = parse_schema(&path).unwrap();
        assert_eq!(schema.required, vec!["email".to_string()]);
    }

    #[test]
    fn test_top_level_default_overrides_property_default() {
        let schema = parse_schema_str(
            r#"
type: object
properties:
  status: { type: string, default: draft }
default:
  status: published
  views: 0
"#,
        )
        .unwrap();

        let defaults = schema.record_defaults();
        assert_eq!(defaults["status"], json!("published"));
        assert_eq!(defaults["views"], json!(0));
    }
}
