//! Model configuration with typed field overrides

use parigate_types::{parse_bool, ConfigOverride, ParigateError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Objective assumed when a configuration does not name one
pub const DEFAULT_PROBLEM_TYPE: &str = "causal_lm";

/// Configuration of a causal transformer.
///
/// Field names follow the conventional config.json layout so pretrained
/// directories parse directly; every field has a default so partial configs
/// load the way partial configs load everywhere else in the ecosystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Architecture identifier used for registry lookup
    #[serde(alias = "model_type")]
    pub architecture: String,
    pub vocab_size: usize,
    pub hidden_size: usize,
    pub intermediate_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    pub max_position_embeddings: usize,
    pub rms_norm_eps: f64,
    pub tie_word_embeddings: bool,
    pub is_encoder_decoder: bool,
    pub pad_token_id: u32,
    /// Objective for loss computation; defaulted when absent
    pub problem_type: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        // Compact dimensions: big enough to shard four ways, small enough
        // that a config-only run finishes in test time.
        Self {
            architecture: "nanollama".to_string(),
            vocab_size: 256,
            hidden_size: 64,
            intermediate_size: 128,
            num_hidden_layers: 2,
            num_attention_heads: 4,
            max_position_embeddings: 128,
            rms_norm_eps: 1e-5,
            tie_word_embeddings: false,
            is_encoder_decoder: false,
            pad_token_id: 0,
            problem_type: None,
        }
    }
}

impl ModelConfig {
    /// Per-head dimension
    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.num_attention_heads
    }

    /// Validate structural invariants
    pub fn validate(&self) -> Result<()> {
        if self.hidden_size % self.num_attention_heads != 0 {
            return Err(ParigateError::config(format!(
                "hidden_size {} not divisible by num_attention_heads {}",
                self.hidden_size, self.num_attention_heads
            )));
        }
        if self.vocab_size == 0 || self.num_hidden_layers == 0 {
            return Err(ParigateError::config(
                "vocab_size and num_hidden_layers must be nonzero",
            ));
        }
        if self.pad_token_id as usize >= self.vocab_size {
            return Err(ParigateError::config(format!(
                "pad_token_id {} outside vocab of size {}",
                self.pad_token_id, self.vocab_size
            )));
        }
        Ok(())
    }

    /// Set the default objective when the configuration does not name one
    pub fn ensure_problem_type(&mut self) {
        if self.problem_type.is_none() {
            self.problem_type = Some(DEFAULT_PROBLEM_TYPE.to_string());
        }
    }

    /// Apply `field=value` overrides, inferring each value's type from the
    /// field's existing value.
    ///
    /// An unknown field, or a value that does not parse as the field's
    /// current type, is a configuration error. A field currently null (an
    /// unset `Option<String>`) is overridden as a string.
    pub fn apply_overrides(&mut self, overrides: &[ConfigOverride]) -> Result<()> {
        if overrides.is_empty() {
            return Ok(());
        }
        let mut value = serde_json::to_value(&*self)?;
        let obj = value
            .as_object_mut()
            .ok_or_else(|| ParigateError::internal("model config did not serialize to an object"))?;

        for ov in overrides {
            let existing = obj.get(&ov.field).ok_or_else(|| {
                ParigateError::config(format!("unknown configuration field `{}`", ov.field))
            })?;
            let typed = infer_typed_value(&ov.field, existing, &ov.value)?;
            obj.insert(ov.field.clone(), typed);
        }

        *self = serde_json::from_value(value)?;
        Ok(())
    }
}

fn infer_typed_value(field: &str, existing: &Value, raw: &str) -> Result<Value> {
    let parse_err = |ty: &str| {
        ParigateError::config(format!(
            "override for `{}`: `{}` does not parse as {}",
            field, raw, ty
        ))
    };
    match existing {
        Value::Bool(_) => Ok(Value::Bool(parse_bool(raw).map_err(|_| parse_err("bool"))?)),
        Value::Number(n) if n.is_u64() || n.is_i64() => {
            let parsed: i64 = raw.parse().map_err(|_| parse_err("integer"))?;
            Ok(Value::Number(parsed.into()))
        }
        Value::Number(_) => {
            let parsed: f64 = raw.parse().map_err(|_| parse_err("float"))?;
            serde_json::Number::from_f64(parsed)
                .map(Value::Number)
                .ok_or_else(|| parse_err("finite float"))
        }
        Value::String(_) | Value::Null => Ok(Value::String(raw.to_string())),
        _ => Err(ParigateError::config(format!(
            "field `{}` holds a structured value and cannot be overridden",
            field
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_infer_types_from_existing_values() {
        let mut config = ModelConfig::default();
        config
            .apply_overrides(&[
                ConfigOverride::new("vocab_size", "512"),
                ConfigOverride::new("rms_norm_eps", "1e-6"),
                ConfigOverride::new("tie_word_embeddings", "true"),
                ConfigOverride::new("architecture", "nanollama"),
            ])
            .unwrap();
        assert_eq!(config.vocab_size, 512);
        assert_eq!(config.rms_norm_eps, 1e-6);
        assert!(config.tie_word_embeddings);
    }

    #[test]
    fn null_fields_are_overridden_as_strings() {
        let mut config = ModelConfig::default();
        assert!(config.problem_type.is_none());
        config
            .apply_overrides(&[ConfigOverride::new("problem_type", "causal_lm")])
            .unwrap();
        assert_eq!(config.problem_type.as_deref(), Some("causal_lm"));
    }

    #[test]
    fn unknown_field_is_rejected() {
        let mut config = ModelConfig::default();
        let err = config
            .apply_overrides(&[ConfigOverride::new("num_heads", "8")])
            .unwrap_err();
        assert!(err.to_string().contains("num_heads"));
    }

    #[test]
    fn mistyped_value_is_rejected() {
        let mut config = ModelConfig::default();
        assert!(config
            .apply_overrides(&[ConfigOverride::new("vocab_size", "many")])
            .is_err());
        assert!(config
            .apply_overrides(&[ConfigOverride::new("tie_word_embeddings", "definitely")])
            .is_err());
    }

    #[test]
    fn problem_type_defaults_when_absent() {
        let mut config = ModelConfig::default();
        config.ensure_problem_type();
        assert_eq!(config.problem_type.as_deref(), Some(DEFAULT_PROBLEM_TYPE));

        let mut config = ModelConfig {
            problem_type: Some("masked_lm".to_string()),
            ..Default::default()
        };
        config.ensure_problem_type();
        assert_eq!(config.problem_type.as_deref(), Some("masked_lm"));
    }

    #[test]
    fn parses_partial_config_json_with_model_type_alias() {
        let config: ModelConfig =
            serde_json::from_str(r#"{"model_type": "nanollama", "vocab_size": 1024}"#).unwrap();
        assert_eq!(config.architecture, "nanollama");
        assert_eq!(config.vocab_size, 1024);
        assert_eq!(config.hidden_size, ModelConfig::default().hidden_size);
    }
}
