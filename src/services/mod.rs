// CheekAI Provenance Services

pub mod errors;
pub mod text_processor;
pub mod config_store;
pub mod lexicon;
pub mod detection;

pub use errors::*;
pub use config_store::*;
pub use lexicon::{Lexicon, GeneratorProfile, PatternCategory, DomainBaseline};

// Re-export detection entry points
pub use detection::{
    Analyzer,
    BatchInput,
    ConsensusBuilder,
    ConsensusState,
};
