// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Schema-driven provider configuration.
//!
//! A [`ConfigSchema`] describes the accepted shape of a provider's
//! configuration map. [`ConfigManager`] validates maps against it, supplies
//! defaults, merges, and exposes the schema for tooling.

pub mod presets;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{codes, ProviderError};
use crate::types::ConfigMap;

static EMAIL: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").ok());

/// JSON type a property must have.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
    #[default]
    Any,
}

impl PropertyType {
    fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::Any => true,
        }
    }

    fn article(&self) -> &'static str {
        match self {
            Self::String => "a string",
            Self::Number => "a number",
            Self::Integer => "an integer",
            Self::Boolean => "a boolean",
            Self::Object => "an object",
            Self::Array => "an array",
            Self::Any => "any value",
        }
    }
}

/// String formats with built-in checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// Absolute `http(s)` URL.
    Uri,
    Email,
}

impl Format {
    fn check(&self, text: &str) -> bool {
        match self {
            Self::Uri => reqwest::Url::parse(text)
                .map(|url| matches!(url.scheme(), "http" | "https") && url.has_host())
                .unwrap_or(false),
            Self::Email => {
                EMAIL
                    .as_ref()
                    .is_some_and(|re| re.is_match(text))
            }
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Uri => "a valid URL",
            Self::Email => "a valid email address",
        }
    }
}

/// Custom validation rule: returns a message describing the violation.
#[derive(Clone)]
pub struct CustomRule(Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>);

impl CustomRule {
    pub fn new<F>(rule: F) -> Self
    where
        F: Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    {
        Self(Arc::new(rule))
    }

    fn check(&self, value: &Value) -> Result<(), String> {
        (self.0)(value)
    }
}

impl fmt::Debug for CustomRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CustomRule")
    }
}

/// Schema of one configuration property.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertySchema {
    #[serde(rename = "type")]
    pub kind: PropertyType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<Format>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,
    /// Schema for array elements.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<PropertySchema>>,
    /// Schemas for nested object fields.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, PropertySchema>,
    #[serde(skip)]
    pub rule: Option<CustomRule>,
}

impl PropertySchema {
    pub fn new(kind: PropertyType) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }

    pub fn string() -> Self {
        Self::new(PropertyType::String)
    }

    pub fn integer() -> Self {
        Self::new(PropertyType::Integer)
    }

    pub fn number() -> Self {
        Self::new(PropertyType::Number)
    }

    pub fn boolean() -> Self {
        Self::new(PropertyType::Boolean)
    }

    pub fn object() -> Self {
        Self::new(PropertyType::Object)
    }

    pub fn array(items: PropertySchema) -> Self {
        Self {
            items: Some(Box::new(items)),
            ..Self::new(PropertyType::Array)
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn range(mut self, minimum: Option<f64>, maximum: Option<f64>) -> Self {
        self.minimum = minimum;
        self.maximum = maximum;
        self
    }

    pub fn min_length(mut self, len: usize) -> Self {
        self.min_length = Some(len);
        self
    }

    pub fn format(mut self, format: Format) -> Self {
        self.format = Some(format);
        self
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn one_of<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.allowed = Some(values.into_iter().map(Into::into).collect());
        self
    }

    pub fn field(mut self, name: impl Into<String>, schema: PropertySchema) -> Self {
        self.properties.insert(name.into(), schema);
        self
    }

    pub fn rule<F>(mut self, rule: F) -> Self
    where
        F: Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    {
        self.rule = Some(CustomRule::new(rule));
        self
    }

    fn check(&self, path: &str, value: &Value, errors: &mut Vec<String>) {
        if !self.kind.matches(value) {
            errors.push(format!("{path} must be {}", self.kind.article()));
            return;
        }

        if let Some(allowed) = &self.allowed {
            if !allowed.contains(value) {
                let options: Vec<String> = allowed.iter().map(Value::to_string).collect();
                errors.push(format!("{path} must be one of [{}]", options.join(", ")));
            }
        }

        if let Some(n) = value.as_f64() {
            if let Some(min) = self.minimum.filter(|min| n < *min) {
                errors.push(format!("{path} must be >= {min}"));
            }
            if let Some(max) = self.maximum.filter(|max| n > *max) {
                errors.push(format!("{path} must be <= {max}"));
            }
        }

        let length = match value {
            Value::String(s) => Some(s.chars().count()),
            Value::Array(items) => Some(items.len()),
            _ => None,
        };
        if let Some(len) = length {
            if let Some(min) = self.min_length.filter(|min| len < *min) {
                errors.push(format!("{path} must have length >= {min}"));
            }
            if let Some(max) = self.max_length.filter(|max| len > *max) {
                errors.push(format!("{path} must have length <= {max}"));
            }
        }

        if let Value::String(text) = value {
            if let Some(format) = self.format.filter(|f| !f.check(text)) {
                errors.push(format!("{path} must be {}", format.label()));
            }
            if let Some(pattern) = &self.pattern {
                match Regex::new(pattern) {
                    Ok(re) if !re.is_match(text) => {
                        errors.push(format!("{path} must match pattern {pattern}"))
                    }
                    Ok(_) => {}
                    Err(_) => errors.push(format!("{path} has an invalid pattern {pattern}")),
                }
            }
        }

        if let (Some(items), Value::Array(values)) = (&self.items, value) {
            for (index, item) in values.iter().enumerate() {
                items.check(&format!("{path}[{index}]"), item, errors);
            }
        }

        if let Value::Object(map) = value {
            for (name, schema) in &self.properties {
                if let Some(nested) = map.get(name) {
                    schema.check(&format!("{path}.{name}"), nested, errors);
                }
            }
        }

        if let Some(rule) = &self.rule {
            if let Err(message) = rule.check(value) {
                errors.push(format!("{path} {message}"));
            }
        }
    }
}

/// Fields that become required when a discriminator has a given value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionalRequirement {
    /// Discriminator field, e.g. `mode`.
    pub field: String,
    pub equals: Value,
    pub required: Vec<String>,
}

/// Schema for a provider configuration map.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSchema {
    #[serde(default)]
    pub properties: BTreeMap<String, PropertySchema>,
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditional: Vec<ConditionalRequirement>,
    /// Accept keys with no property schema.
    #[serde(default = "default_true")]
    pub additional_properties: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ConfigSchema {
    fn default() -> Self {
        Self {
            properties: BTreeMap::new(),
            required: Vec::new(),
            conditional: Vec::new(),
            additional_properties: true,
        }
    }
}

impl ConfigSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn property(mut self, name: impl Into<String>, schema: PropertySchema) -> Self {
        self.properties.insert(name.into(), schema);
        self
    }

    pub fn require<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for field in fields {
            let field = field.into();
            if !self.required.contains(&field) {
                self.required.push(field);
            }
        }
        self
    }

    pub fn require_when<I, S>(mut self, field: &str, equals: impl Into<Value>, required: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.conditional.push(ConditionalRequirement {
            field: field.to_string(),
            equals: equals.into(),
            required: required.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn strict(mut self) -> Self {
        self.additional_properties = false;
        self
    }

    /// Property defaults declared in the schema.
    pub fn property_defaults(&self) -> ConfigMap {
        self.properties
            .iter()
            .filter_map(|(name, p)| p.default.clone().map(|d| (name.clone(), d)))
            .collect()
    }

    /// Combine with an extension; the extension's properties win.
    pub fn merge(&self, extension: &ConfigSchema) -> ConfigSchema {
        let mut merged = self.clone();
        for (name, property) in &extension.properties {
            merged.properties.insert(name.clone(), property.clone());
        }
        merged = merged.require(extension.required.iter().cloned());
        merged.conditional.extend(extension.conditional.iter().cloned());
        merged.additional_properties =
            self.additional_properties && extension.additional_properties;
        merged
    }
}

/// Deep-merge `overlay` onto `base`. Objects merge per key; anything else
/// in `overlay` replaces the base value.
pub fn deep_merge(base: &mut ConfigMap, overlay: &ConfigMap) {
    for (key, value) in overlay {
        match (base.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                deep_merge(existing, incoming)
            }
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Validates, defaults, and merges provider configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigManager {
    schema: ConfigSchema,
    defaults: ConfigMap,
}

impl ConfigManager {
    /// Manager whose defaults are the schema's property defaults.
    pub fn new(schema: ConfigSchema) -> Self {
        let defaults = schema.property_defaults();
        Self { schema, defaults }
    }

    /// Manager with explicit defaults layered over the property defaults.
    pub fn with_defaults(schema: ConfigSchema, defaults: ConfigMap) -> Self {
        let mut merged = schema.property_defaults();
        deep_merge(&mut merged, &defaults);
        Self {
            schema,
            defaults: merged,
        }
    }

    pub fn schema(&self) -> &ConfigSchema {
        &self.schema
    }

    pub fn defaults(&self) -> ConfigMap {
        self.defaults.clone()
    }

    pub fn validate(&self, config: &ConfigMap) -> bool {
        self.validation_errors(config).is_empty()
    }

    /// Human-readable messages naming each offending field path.
    pub fn validation_errors(&self, config: &ConfigMap) -> Vec<String> {
        let mut errors = Vec::new();

        for field in &self.schema.required {
            if config.get(field).is_none_or(Value::is_null) {
                errors.push(format!("{field} is required"));
            }
        }

        for rule in &self.schema.conditional {
            if config.get(&rule.field) != Some(&rule.equals) {
                continue;
            }
            for field in &rule.required {
                if config.get(field).is_none_or(Value::is_null) {
                    errors.push(format!(
                        "{field} is required when {} is {}",
                        rule.field, rule.equals
                    ));
                }
            }
        }

        for (key, value) in config {
            match self.schema.properties.get(key) {
                Some(_) if value.is_null() => {}
                Some(property) => property.check(key, value, &mut errors),
                None if !self.schema.additional_properties => {
                    errors.push(format!("{key} is not allowed"))
                }
                None => {}
            }
        }

        errors
    }

    /// Defaults overlaid with `config`, validated.
    pub fn merge_with_defaults(&self, config: &ConfigMap) -> Result<ConfigMap, ProviderError> {
        let mut merged = self.defaults.clone();
        deep_merge(&mut merged, config);

        let errors = self.validation_errors(&merged);
        if errors.is_empty() {
            return Ok(merged);
        }

        let fields: Vec<String> = errors
            .iter()
            .filter_map(|e| e.split_whitespace().next())
            .map(|f| f.split(['.', '[']).next().unwrap_or(f).to_string())
            .collect();
        Err(ProviderError::configuration(
            codes::INVALID_CONFIG,
            format!("Invalid configuration: {}", errors.join("; ")),
        )
        .with_details(json!({ "errors": errors, "fields": fields })))
    }

    /// Introspectable view: properties, required fields, defaults.
    pub fn describe(&self) -> Value {
        json!({
            "properties": self.schema.properties,
            "required": self.schema.required,
            "conditional": self.schema.conditional,
            "additionalProperties": self.schema.additional_properties,
            "defaults": self.defaults,
        })
    }

    /// A new manager combining this schema with an extension. `self` is
    /// left untouched.
    pub fn extend(&self, schema: ConfigSchema, defaults: ConfigMap) -> ConfigManager {
        let merged_schema = self.schema.merge(&schema);
        let mut merged_defaults = self.defaults.clone();
        deep_merge(&mut merged_defaults, &schema.property_defaults());
        deep_merge(&mut merged_defaults, &defaults);
        ConfigManager {
            schema: merged_schema,
            defaults: merged_defaults,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(value: Value) -> ConfigMap {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn manager() -> ConfigManager {
        ConfigManager::new(
            ConfigSchema::new()
                .property("name", PropertySchema::string().min_length(1))
                .property(
                    "timeout",
                    PropertySchema::integer()
                        .range(Some(1.0), Some(600_000.0))
                        .default_value(30_000),
                )
                .property("level", PropertySchema::string().one_of(["low", "high"]))
                .property("url", PropertySchema::string().format(Format::Uri))
                .property("args", PropertySchema::array(PropertySchema::string()))
                .property(
                    "retry",
                    PropertySchema::object()
                        .field("max", PropertySchema::integer().range(Some(0.0), None)),
                )
                .require(["name"]),
        )
    }

    #[test]
    fn test_valid_config() {
        let config = map(json!({"name": "x", "timeout": 10, "url": "https://a.example"}));
        assert!(manager().validate(&config));
    }

    #[test]
    fn test_validation_messages_name_fields() {
        let config = map(json!({
            "timeout": 0,
            "level": "medium",
            "url": "not a url",
            "args": ["ok", 3],
            "retry": {"max": -1}
        }));
        let errors = manager().validation_errors(&config);
        assert!(errors.contains(&"name is required".to_string()));
        assert!(errors.contains(&"timeout must be >= 1".to_string()));
        assert!(errors.iter().any(|e| e.starts_with("level must be one of")));
        assert!(errors.contains(&"url must be a valid URL".to_string()));
        assert!(errors.contains(&"args[1] must be a string".to_string()));
        assert!(errors.contains(&"retry.max must be >= 0".to_string()));
    }

    #[test]
    fn test_email_format() {
        let manager = ConfigManager::new(
            ConfigSchema::new().property("contact", PropertySchema::string().format(Format::Email)),
        );
        assert!(manager.validate(&map(json!({"contact": "dev@example.com"}))));
        assert_eq!(
            manager.validation_errors(&map(json!({"contact": "dev at example"}))),
            vec!["contact must be a valid email address"]
        );
    }

    #[test]
    fn test_type_mismatch_and_custom_rule() {
        let manager = ConfigManager::new(ConfigSchema::new().property(
            "model",
            PropertySchema::string().rule(|v| {
                if v.as_str().is_some_and(|s| s.starts_with("gpt")) {
                    Ok(())
                } else {
                    Err("must name a gpt model".to_string())
                }
            }),
        ));
        assert_eq!(
            manager.validation_errors(&map(json!({"model": 4}))),
            vec!["model must be a string"]
        );
        assert_eq!(
            manager.validation_errors(&map(json!({"model": "llama"}))),
            vec!["model must name a gpt model"]
        );
    }

    #[test]
    fn test_strict_schema_rejects_unknown_keys() {
        let manager = ConfigManager::new(ConfigSchema::new().strict());
        assert_eq!(
            manager.validation_errors(&map(json!({"extra": 1}))),
            vec!["extra is not allowed"]
        );
    }

    #[test]
    fn test_merge_with_defaults() {
        let merged = manager()
            .merge_with_defaults(&map(json!({"name": "x"})))
            .unwrap();
        assert_eq!(merged["timeout"], 30_000);
        assert_eq!(merged["name"], "x");

        let err = manager()
            .merge_with_defaults(&map(json!({"timeout": -5})))
            .unwrap_err();
        assert_eq!(err.code, codes::INVALID_CONFIG);
        assert!(err.message.contains("name is required"));
        let fields = err.details.unwrap()["fields"].clone();
        assert!(fields.as_array().unwrap().contains(&json!("timeout")));
    }

    #[test]
    fn test_deep_merge_objects() {
        let mut base = map(json!({"headers": {"a": "1", "b": "2"}, "x": 1}));
        deep_merge(&mut base, &map(json!({"headers": {"b": "3"}, "x": [1]})));
        assert_eq!(base["headers"], json!({"a": "1", "b": "3"}));
        assert_eq!(base["x"], json!([1]));
    }

    #[test]
    fn test_extend_leaves_original_untouched() {
        let base = manager();
        let extended = base.extend(
            ConfigSchema::new()
                .property("model", PropertySchema::string().default_value("m1"))
                .require(["model"]),
            map(json!({"timeout": 5})),
        );

        assert!(!base.schema().properties.contains_key("model"));
        assert_eq!(base.defaults()["timeout"], 30_000);
        assert_eq!(extended.defaults()["timeout"], 5);
        assert_eq!(extended.defaults()["model"], "m1");
        assert!(extended.schema().required.contains(&"name".to_string()));
        assert!(extended.schema().required.contains(&"model".to_string()));
    }

    #[test]
    fn test_describe_is_serializable() {
        let described = manager().describe();
        assert_eq!(described["properties"]["timeout"]["type"], "integer");
        assert_eq!(described["required"], json!(["name"]));
        assert_eq!(described["defaults"]["timeout"], 30_000);
    }
}
