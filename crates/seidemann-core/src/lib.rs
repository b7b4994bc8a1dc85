pub mod analog;
pub mod behavior;
pub mod codebook;
pub mod config;
pub mod container;
pub mod converter;
pub mod error;
pub mod events;
pub mod imaging;
pub mod metadata;
pub mod suite2p;
pub mod trials;

pub use codebook::{Codebook, ConditionType, DefinitionNames};
pub use config::{ConversionConfig, CONFIG_VERSION};
pub use container::{
    BundleManifest, FrameBlock, FrameSource, ManifestEntry, SessionBundle, TrialTable,
};
pub use converter::{ConversionOptions, ConversionSummary, DataInterface, SessionConverter};
pub use error::{ConversionError, Result};
pub use imaging::{MappedFrames, MemmapImaging};
