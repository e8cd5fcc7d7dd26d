//! Model handle and forward-entry metadata

use crate::config::ModelConfig;
use crate::tokenizer::TextTokenizer;
use crate::weights::WeightStore;
use candle_core::Device as CandleDevice;

/// What the model's forward entry point accepts.
///
/// The input conditioner selects probe channels by these declared names,
/// and derives `decoder_`-prefixed duplicates for encoder-decoder models.
#[derive(Debug, Clone)]
pub struct ForwardSpec {
    pub input_names: Vec<String>,
    pub is_encoder_decoder: bool,
}

impl ForwardSpec {
    pub fn accepts(&self, name: &str) -> bool {
        self.input_names.iter().any(|n| n == name)
    }
}

/// An instantiated model: configuration, parameters, tokenizer, target
/// device. Exclusively owned by one run; the sharding step consumes it.
pub struct ModelHandle {
    pub config: ModelConfig,
    pub weights: WeightStore,
    pub tokenizer: Box<dyn TextTokenizer>,
    pub device: CandleDevice,
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("config", &self.config)
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

impl ModelHandle {
    pub fn forward_spec(&self) -> ForwardSpec {
        let mut input_names = vec!["input_ids".to_string(), "attention_mask".to_string()];
        if self.config.is_encoder_decoder {
            input_names.push("decoder_input_ids".to_string());
        }
        ForwardSpec {
            input_names,
            is_encoder_decoder: self.config.is_encoder_decoder,
        }
    }
}
