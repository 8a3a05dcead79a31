use serde_json::{json, Map, Value};

/// Type of a single argument field.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
    Array(Box<FieldType>),
    Object(ObjectSchema),
    Enum(Vec<String>),
}

impl FieldType {
    pub fn array(item: FieldType) -> Self {
        Self::Array(Box::new(item))
    }

    pub fn one_of<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Enum(values.into_iter().map(Into::into).collect())
    }

    fn to_json(&self) -> Value {
        match self {
            Self::String => json!({"type": "string"}),
            Self::Integer => json!({"type": "integer"}),
            Self::Number => json!({"type": "number"}),
            Self::Boolean => json!({"type": "boolean"}),
            Self::Array(item) => json!({"type": "array", "items": item.to_json()}),
            Self::Object(obj) => obj.to_json(),
            Self::Enum(values) => json!({"type": "string", "enum": values}),
        }
    }

    fn validate(&self, value: &Value, path: &str) -> Result<(), String> {
        let ok = match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array(item) => {
                let Some(items) = value.as_array() else {
                    return Err(format!("{path}: expected array"));
                };
                for (i, v) in items.iter().enumerate() {
                    item.validate(v, &format!("{path}[{i}]"))?;
                }
                true
            }
            Self::Object(obj) => return obj.validate_at(value, path),
            Self::Enum(values) => {
                let Some(s) = value.as_str() else {
                    return Err(format!("{path}: expected one of {values:?}"));
                };
                if !values.iter().any(|v| v == s) {
                    return Err(format!("{path}: {s:?} is not one of {values:?}"));
                }
                true
            }
        };
        if ok {
            Ok(())
        } else {
            Err(format!("{path}: expected {}", self.type_name()))
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
            Self::Enum(_) => "enum",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Field {
    pub name: String,
    pub field_type: FieldType,
    pub description: Option<String>,
    pub required: bool,
}

/// Object-shaped argument schema. Closed (no unknown keys) unless
/// `additional_properties` is set.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObjectSchema {
    pub fields: Vec<Field>,
    pub additional_properties: bool,
}

impl ObjectSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(mut self, name: &str, field_type: FieldType, description: &str) -> Self {
        self.fields.push(Field {
            name: name.into(),
            field_type,
            description: Some(description.into()),
            required: true,
        });
        self
    }

    pub fn optional(mut self, name: &str, field_type: FieldType, description: &str) -> Self {
        self.fields.push(Field {
            name: name.into(),
            field_type,
            description: Some(description.into()),
            required: false,
        });
        self
    }

    pub fn allow_additional(mut self) -> Self {
        self.additional_properties = true;
        self
    }

    pub fn to_json(&self) -> Value {
        let mut properties = Map::new();
        for field in &self.fields {
            let mut prop = field.field_type.to_json();
            if let (Some(desc), Some(obj)) = (&field.description, prop.as_object_mut()) {
                obj.insert("description".into(), Value::String(desc.clone()));
            }
            properties.insert(field.name.clone(), prop);
        }
        let required: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.as_str())
            .collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": self.additional_properties,
        })
    }

    /// Validate tool arguments. `null` counts as an empty object, since
    /// providers send it for argument-less calls.
    pub fn validate(&self, value: &Value) -> Result<(), String> {
        self.validate_at(value, "arguments")
    }

    fn validate_at(&self, value: &Value, path: &str) -> Result<(), String> {
        let empty = Map::new();
        let obj = match value {
            Value::Null => &empty,
            Value::Object(map) => map,
            _ => return Err(format!("{path}: expected object")),
        };

        for field in &self.fields {
            match obj.get(&field.name) {
                Some(Value::Null) | None if field.required => {
                    return Err(format!("{path}.{}: required field missing", field.name));
                }
                Some(Value::Null) | None => {}
                Some(v) => field.field_type.validate(v, &format!("{path}.{}", field.name))?,
            }
        }

        if !self.additional_properties {
            if let Some(unknown) = obj.keys().find(|k| !self.fields.iter().any(|f| &f.name == *k)) {
                return Err(format!("{path}.{unknown}: unknown field"));
            }
        }
        Ok(())
    }
}

/// Declared interface of a tool, validated before the handler runs.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: ObjectSchema,
}

impl ToolSchema {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: ObjectSchema) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// Render as a JSON-Schema tool definition for providers.
    pub fn to_json_schema(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "parameters": self.parameters.to_json(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_schema() -> ObjectSchema {
        ObjectSchema::new()
            .required("path", FieldType::String, "File to read")
            .optional("offset", FieldType::Integer, "First line")
            .optional("mode", FieldType::one_of(["text", "bytes"]), "Read mode")
    }

    #[test]
    fn accepts_valid_arguments() {
        let schema = read_schema();
        assert!(schema.validate(&json!({"path": "a.txt"})).is_ok());
        assert!(schema.validate(&json!({"path": "a.txt", "offset": 3, "mode": "bytes"})).is_ok());
    }

    #[test]
    fn rejects_missing_required() {
        let err = read_schema().validate(&json!({"offset": 1})).unwrap_err();
        assert!(err.contains("arguments.path"), "{err}");
    }

    #[test]
    fn rejects_wrong_type() {
        let err = read_schema().validate(&json!({"path": 42})).unwrap_err();
        assert_eq!(err, "arguments.path: expected string");

        let err = read_schema().validate(&json!({"path": "a", "offset": 1.5})).unwrap_err();
        assert_eq!(err, "arguments.offset: expected integer");
    }

    #[test]
    fn rejects_unknown_enum_value() {
        let err = read_schema().validate(&json!({"path": "a", "mode": "hex"})).unwrap_err();
        assert!(err.contains("not one of"), "{err}");
    }

    #[test]
    fn closed_schema_rejects_unknown_keys() {
        let err = read_schema().validate(&json!({"path": "a", "extra": true})).unwrap_err();
        assert!(err.contains("unknown field"));

        let open = read_schema().allow_additional();
        assert!(open.validate(&json!({"path": "a", "extra": true})).is_ok());
    }

    #[test]
    fn null_is_empty_object() {
        assert!(ObjectSchema::new().validate(&Value::Null).is_ok());
        assert!(read_schema().validate(&Value::Null).is_err());
        assert!(ObjectSchema::new().validate(&json!("str")).is_err());
    }

    #[test]
    fn nested_arrays_and_objects() {
        let item = ObjectSchema::new()
            .required("content", FieldType::String, "Task")
            .required("status", FieldType::one_of(["pending", "done"]), "State");
        let schema = ObjectSchema::new().required("todos", FieldType::array(FieldType::Object(item)), "List");

        assert!(schema
            .validate(&json!({"todos": [{"content": "a", "status": "done"}]}))
            .is_ok());
        let err = schema
            .validate(&json!({"todos": [{"content": "a", "status": "later"}]}))
            .unwrap_err();
        assert!(err.starts_with("arguments.todos[0].status"), "{err}");
    }

    #[test]
    fn renders_json_schema() {
        let schema = ToolSchema::new("read_file", "Read a file", read_schema());
        let json = schema.to_json_schema();
        assert_eq!(json["name"], "read_file");
        assert_eq!(json["parameters"]["type"], "object");
        assert_eq!(json["parameters"]["required"], json!(["path"]));
        assert_eq!(json["parameters"]["additionalProperties"], false);
        assert_eq!(json["parameters"]["properties"]["mode"]["enum"], json!(["text", "bytes"]));
        assert_eq!(json["parameters"]["properties"]["path"]["description"], "File to read");
    }
}
