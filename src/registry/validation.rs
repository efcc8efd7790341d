// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Provider metadata validation.

use serde_json::Value;

use crate::error::RegistryError;
use crate::types::{is_valid_provider_type, ProviderMetadata};

fn invalid(provider_type: &str, field: &str, message: &str) -> RegistryError {
    RegistryError::InvalidMetadata {
        provider_type: provider_type.to_string(),
        field: field.to_string(),
        message: message.to_string(),
    }
}

/// Check metadata before any registration side effect.
pub fn validate_metadata(metadata: &ProviderMetadata) -> Result<(), RegistryError> {
    let provider_type = metadata.provider_type.as_str();
    if provider_type.is_empty() {
        return Err(invalid(provider_type, "type", "must be a non-empty string"));
    }
    if !is_valid_provider_type(provider_type) {
        return Err(invalid(
            provider_type,
            "type",
            "must contain only letters, digits, '-' and '_'",
        ));
    }
    if metadata.name.trim().is_empty() {
        return Err(invalid(provider_type, "name", "must be a non-empty string"));
    }
    if metadata.version.trim().is_empty() {
        return Err(invalid(provider_type, "version", "must be a non-empty string"));
    }
    if metadata.supported_features.iter().any(|f| f.trim().is_empty()) {
        return Err(invalid(
            provider_type,
            "supportedFeatures",
            "must not contain empty entries",
        ));
    }
    Ok(())
}

/// Decode and validate metadata from untyped JSON, reporting the offending
/// field rather than a serde message.
pub fn metadata_from_value(value: &Value) -> Result<ProviderMetadata, RegistryError> {
    let provider_type = value
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let Some(object) = value.as_object() else {
        return Err(invalid(&provider_type, "metadata", "must be an object"));
    };
    if !object.get("type").is_some_and(Value::is_string) {
        return Err(invalid(&provider_type, "type", "must be a non-empty string"));
    }
    for field in ["name", "version"] {
        if !object.get(field).is_some_and(Value::is_string) {
            return Err(invalid(&provider_type, field, "must be a string"));
        }
    }
    match object.get("supportedFeatures") {
        None => {}
        Some(Value::Array(items)) if items.iter().all(Value::is_string) => {}
        Some(Value::Array(_)) => {
            return Err(invalid(
                &provider_type,
                "supportedFeatures",
                "must contain only strings",
            ))
        }
        Some(_) => {
            return Err(invalid(&provider_type, "supportedFeatures", "must be an array"))
        }
    }

    let metadata: ProviderMetadata = serde_json::from_value(value.clone())
        .map_err(|e| invalid(&provider_type, "metadata", &e.to_string()))?;
    validate_metadata(&metadata)?;
    Ok(metadata)
}
