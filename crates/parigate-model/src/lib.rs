//! # parigate-model
//!
//! Deterministic model instantiation for the verification harness: seeded
//! weight materialization, config-only and pretrained loading paths, a
//! scoped lazy-materialization guard, and the model-facing I/O types the
//! rest of the workspace consumes.

pub mod config;
pub mod lazy;
pub mod loader;
pub mod model;
pub mod outputs;
pub mod probe;
pub mod tokenizer;
pub mod weights;

pub use config::ModelConfig;
pub use lazy::LazyScope;
pub use loader::{load, to_candle_device};
pub use model::{ForwardSpec, ModelHandle};
pub use outputs::{ModelOutputs, OutputValue, LOSS_FIELD};
pub use probe::ProbeInput;
pub use tokenizer::{ByteFallbackTokenizer, EncodedProbe, HfTokenizer, TextTokenizer};
pub use weights::WeightStore;
