// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Preset schemas for common provider shapes.

use super::{ConfigManager, ConfigSchema, Format, PropertySchema};

/// HTTP-backed providers: `baseUrl`, `apiKey`, `headers`, `timeout`.
pub fn http_schema() -> ConfigSchema {
    ConfigSchema::new()
        .property(
            "baseUrl",
            PropertySchema::string()
                .format(Format::Uri)
                .describe("Base URL of the API"),
        )
        .property(
            "apiKey",
            PropertySchema::string()
                .min_length(1)
                .describe("API key sent as a bearer token"),
        )
        .property(
            "headers",
            PropertySchema::object().describe("Extra request headers"),
        )
        .property(
            "timeout",
            PropertySchema::integer()
                .range(Some(1.0), None)
                .default_value(30_000)
                .describe("Request timeout in milliseconds"),
        )
        .require(["baseUrl"])
}

/// CLI-backed providers: `executable`, `args`, `workingDirectory`, `env`.
pub fn cli_schema() -> ConfigSchema {
    ConfigSchema::new()
        .property(
            "executable",
            PropertySchema::string()
                .min_length(1)
                .describe("Program to run"),
        )
        .property(
            "args",
            PropertySchema::array(PropertySchema::string())
                .default_value(serde_json::json!([]))
                .describe("Arguments passed before each request's arguments"),
        )
        .property(
            "workingDirectory",
            PropertySchema::string().describe("Directory the process runs in"),
        )
        .property(
            "env",
            PropertySchema::object().describe("Environment variables for the process"),
        )
        .property(
            "timeout",
            PropertySchema::integer()
                .range(Some(1.0), None)
                .default_value(300_000)
                .describe("Process timeout in milliseconds"),
        )
        .require(["executable"])
}

/// Providers that run either locally (CLI) or in the cloud (HTTP), chosen by
/// `mode`.
pub fn hybrid_schema() -> ConfigSchema {
    ConfigSchema::new()
        .property(
            "mode",
            PropertySchema::string()
                .one_of(["local", "cloud"])
                .default_value("local")
                .describe("Where the provider runs"),
        )
        .property("executable", PropertySchema::string().min_length(1))
        .property("args", PropertySchema::array(PropertySchema::string()))
        .property("baseUrl", PropertySchema::string().format(Format::Uri))
        .property("apiKey", PropertySchema::string().min_length(1))
        .property(
            "timeout",
            PropertySchema::integer().range(Some(1.0), None),
        )
        .require(["mode"])
        .require_when("mode", "local", ["executable"])
        .require_when("mode", "cloud", ["baseUrl", "apiKey"])
}

pub fn http() -> ConfigManager {
    ConfigManager::new(http_schema())
}

pub fn cli() -> ConfigManager {
    ConfigManager::new(cli_schema())
}

pub fn hybrid() -> ConfigManager {
    ConfigManager::new(hybrid_schema())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ConfigMap;
    use serde_json::{json, Value};

    fn map(value: Value) -> ConfigMap {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_http_preset() {
        let manager = http();
        assert!(manager.validate(&map(json!({"baseUrl": "https://api.example.com"}))));
        assert_eq!(
            manager.validation_errors(&map(json!({"baseUrl": "ftp://x", "timeout": 0}))),
            vec!["baseUrl must be a valid URL", "timeout must be >= 1"]
        );
        assert_eq!(manager.defaults()["timeout"], 30_000);
    }

    #[test]
    fn test_cli_preset() {
        let manager = cli();
        assert!(!manager.validate(&ConfigMap::new()));
        let merged = manager
            .merge_with_defaults(&map(json!({"executable": "echo"})))
            .unwrap();
        assert_eq!(merged["args"], json!([]));
        assert_eq!(merged["timeout"], 300_000);
    }

    #[test]
    fn test_hybrid_discriminator() {
        let manager = hybrid();

        let local = manager.merge_with_defaults(&ConfigMap::new()).unwrap_err();
        assert!(local.message.contains("executable is required when mode is \"local\""));

        assert!(manager.validate(&map(json!({"mode": "local", "executable": "aider"}))));

        let errors = manager.validation_errors(&map(json!({"mode": "cloud"})));
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| e.contains("when mode is \"cloud\"")));

        assert!(manager.validate(&map(json!({
            "mode": "cloud",
            "baseUrl": "https://cloud.example.com",
            "apiKey": "k"
        }))));

        assert!(!manager.validate(&map(json!({"mode": "orbit", "executable": "x"}))));
    }
}
