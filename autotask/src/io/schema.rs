//! JSON Schema validation for embedded schemas.

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde_json::Value;

/// Validate `instance` against the schema source `schema`.
///
/// All violations are reported in one error, prefixed with `label`.
pub fn validate(schema: &str, instance: &Value, label: &str) -> Result<()> {
    let schema_value: Value =
        serde_json::from_str(schema).with_context(|| format!("parse {label} schema"))?;
    let compiled =
        validator_for(&schema_value).map_err(|err| anyhow!("invalid {label} schema: {err}"))?;
    if !compiled.is_valid(instance) {
        let messages = compiled
            .iter_errors(instance)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "{label} schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}
