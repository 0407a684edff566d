// Timeglow Core
//
// Domain types and collaborator contracts for the photo restoration pipeline.
// Storage, provider and engine crates implement or consume these traits;
// this crate has no I/O of its own beyond telemetry setup.

pub mod config;
pub mod credit;
pub mod error;
pub mod events;
pub mod image;
pub mod job;
pub mod presets;
pub mod restoration;
pub mod telemetry;
pub mod traits;
pub mod usage;

pub use config::{ConfigError, GeminiSettings, PipelineConfig, ProviderMode};
pub use credit::{CreditAccount, CreditPolicy, DebitOutcome};
pub use error::{DispatchError, LedgerError, ObjectStoreError, ProviderError, StoreError};
pub use events::{AccountOpened, BillingTopup, ImageUploaded, PipelineEvent};
pub use image::SourceImage;
pub use job::{JobStatus, NewJob, RestorationJob};
pub use presets::{Preset, PresetCatalog, DEFAULT_PRESET};
pub use restoration::{NewRestorationResult, RestorationResult};
pub use traits::{
    CreditLedger, JobStore, ObjectStore, ProviderOutput, RestorationProvider, RestorationRequest,
    RestorationStore, SourceImageStore, UsageLogStore,
};
pub use usage::{NewUsageEntry, UsageAction, UsageLogEntry};
