//! Schema validation for event and response payloads.
//!
//! The pipeline only ever sees the [`Schema`] trait: `parse` either returns
//! the validated (and possibly re-shaped) payload or a [`ValidationError`]
//! listing every violation found. The crate ships [`JsonSchema`], a JSON
//! Schema subset good enough for declarative handler contracts:
//!
//! 1. **Required properties** – every name under `required:` must be present
//!    and non-null.
//! 2. **Unknown properties** – keys not listed under `properties:` are
//!    rejected, so contract drift surfaces immediately.
//! 3. **Type checks with safe coercion** – `"5"` becomes `5` for integer
//!    fields, `"true"` becomes `true` for booleans. The coerced object is
//!    what the business function receives.
//! 4. **Enum membership**, checked after coercion.
//! 5. **Bounds** – `minimum`/`maximum` for numbers, `minLength`/`maxLength`
//!    for strings.

use serde_json::Value;

use crate::error::{ValidationError, Violation};

/// Contract for payload validators.
///
/// `parse` returns the shaped payload on success. Implementations report
/// failures against the event side; the output-validation step re-targets
/// the error at the response side itself.
pub trait Schema: Send + Sync {
    /// Validate `value`, returning the shaped payload or every violation found.
    fn parse(&self, value: &Value) -> Result<Value, ValidationError>;
}

/// JSON Schema subset validator.
#[derive(Debug, Clone)]
pub struct JsonSchema {
    definition: Value,
}

impl JsonSchema {
    /// Wrap a JSON Schema definition.
    ///
    /// A null or empty definition accepts anything unchanged, so handlers
    /// without a declared contract keep working.
    #[must_use]
    pub fn new(definition: Value) -> Self {
        Self { definition }
    }

    fn properties(&self) -> Option<&serde_json::Map<String, Value>> {
        self.definition.get("properties").and_then(Value::as_object)
    }

    fn required(&self) -> Vec<&str> {
        self.definition
            .get("required")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}

impl Schema for JsonSchema {
    fn parse(&self, value: &Value) -> Result<Value, ValidationError> {
        if self.definition.is_null() || self.definition == Value::Object(serde_json::Map::new()) {
            return Ok(value.clone());
        }

        let Some(properties) = self.properties() else {
            return Ok(value.clone());
        };

        // Normalise the payload to an object; null means "no payload".
        let payload = match value {
            Value::Object(map) => map.clone(),
            Value::Null => serde_json::Map::new(),
            _ => {
                return Err(ValidationError::event(vec![Violation::new(
                    "",
                    "payload must be a JSON object",
                )]));
            }
        };

        let mut violations = Vec::new();

        for name in self.required() {
            match payload.get(name) {
                None => violations.push(Violation::new(name, "required property is missing")),
                Some(Value::Null) => {
                    violations.push(Violation::new(name, "required property must not be null"));
                }
                _ => {}
            }
        }

        for key in payload.keys() {
            if !properties.contains_key(key.as_str()) {
                let known: Vec<&str> = properties.keys().map(String::as_str).collect();
                violations.push(Violation::new(
                    key,
                    format!("unknown property, expected one of: {}", known.join(", ")),
                ));
            }
        }

        // Stop on structural problems so the caller sees a clear message
        // instead of cascading type errors.
        if !violations.is_empty() {
            return Err(ValidationError::event(violations));
        }

        let mut shaped = serde_json::Map::new();
        for (name, prop_schema) in properties {
            let Some(raw) = payload.get(name.as_str()) else {
                continue;
            };
            if raw.is_null() {
                // Acceptable for optional properties.
                continue;
            }

            match check_property(name, raw, prop_schema) {
                Ok(coerced) => {
                    shaped.insert(name.clone(), coerced);
                }
                Err(mut property_violations) => violations.append(&mut property_violations),
            }
        }

        if violations.is_empty() {
            Ok(Value::Object(shaped))
        } else {
            Err(ValidationError::event(violations))
        }
    }
}

// ── Per-property validation ───────────────────────────────────────────────────

fn check_property(name: &str, value: &Value, prop_schema: &Value) -> Result<Value, Vec<Violation>> {
    let coerced = match prop_schema.get("type").and_then(Value::as_str) {
        Some(ty) => coerce(value, ty).map_err(|msg| vec![Violation::new(name, msg)])?,
        None => value.clone(),
    };

    let mut violations = Vec::new();

    if let Some(options) = prop_schema.get("enum").and_then(Value::as_array) {
        if !options.contains(&coerced) {
            let listed: Vec<String> = options.iter().map(display_value).collect();
            violations.push(Violation::new(
                name,
                format!("must be one of: {}", listed.join(", ")),
            ));
        }
    }

    if let Some(num) = coerced.as_f64() {
        if let Some(min) = prop_schema.get("minimum").and_then(Value::as_f64) {
            if num < min {
                violations.push(Violation::new(name, format!("must be >= {min}")));
            }
        }
        if let Some(max) = prop_schema.get("maximum").and_then(Value::as_f64) {
            if num > max {
                violations.push(Violation::new(name, format!("must be <= {max}")));
            }
        }
    }

    if let Some(s) = coerced.as_str() {
        let len = s.chars().count() as u64;
        if let Some(min_len) = prop_schema.get("minLength").and_then(Value::as_u64) {
            if len < min_len {
                violations.push(Violation::new(
                    name,
                    format!("must be at least {min_len} characters long"),
                ));
            }
        }
        if let Some(max_len) = prop_schema.get("maxLength").and_then(Value::as_u64) {
            if len > max_len {
                violations.push(Violation::new(
                    name,
                    format!("must be at most {max_len} characters long"),
                ));
            }
        }
    }

    if violations.is_empty() {
        Ok(coerced)
    } else {
        Err(violations)
    }
}

// ── Type coercion ─────────────────────────────────────────────────────────────

fn coerce(value: &Value, declared: &str) -> Result<Value, String> {
    match declared {
        "string" => match value {
            Value::String(_) => Ok(value.clone()),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            _ => Err(format!("expected string, got {}", type_name(value))),
        },
        "integer" => match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
            Value::Number(n) => {
                if let Some(f) = n.as_f64() {
                    if f.fract() == 0.0 {
                        #[allow(clippy::cast_possible_truncation)]
                        return Ok(Value::Number((f as i64).into()));
                    }
                }
                Err(format!("expected integer, got float {n}"))
            }
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(|i| Value::Number(i.into()))
                .map_err(|_| format!("expected integer, got string \"{s}\"")),
            _ => Err(format!("expected integer, got {}", type_name(value))),
        },
        "number" => match value {
            Value::Number(_) => Ok(value.clone()),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(|f| serde_json::Number::from_f64(f).map(Value::Number))
                .ok_or_else(|| format!("expected number, got string \"{s}\"")),
            _ => Err(format!("expected number, got {}", type_name(value))),
        },
        "boolean" => match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::String(s) => match s.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(Value::Bool(true)),
                "false" | "0" | "no" => Ok(Value::Bool(false)),
                _ => Err(format!("expected boolean, got string \"{s}\"")),
            },
            Value::Number(n) => match n.as_i64() {
                Some(1) => Ok(Value::Bool(true)),
                Some(0) => Ok(Value::Bool(false)),
                _ => Err(format!("expected boolean, got number {n}")),
            },
            _ => Err(format!("expected boolean, got {}", type_name(value))),
        },
        "array" => match value {
            Value::Array(_) => Ok(value.clone()),
            _ => Err(format!("expected array, got {}", type_name(value))),
        },
        "object" => match value {
            Value::Object(_) => Ok(value.clone()),
            _ => Err(format!("expected object, got {}", type_name(value))),
        },
        _ => Ok(value.clone()), // Unknown declared type passes through.
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

fn display_value(v: &Value) -> String {
    match v {
        Value::String(s) => format!("\"{s}\""),
        _ => v.to_string(),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
