pub mod client;
pub mod config;
pub mod coordinator;
pub mod overlay;
pub mod page;

pub use client::{
    GenerationError, GenerationParams, GenerationRequest, HuggingFaceClient, ImageGenerator,
    RetryPolicy,
};
pub use config::EngineConfig;
pub use coordinator::BackgroundCoordinator;
pub use overlay::{discover_images, OverlayController, OverlayError, SessionState, TrackedImage};
pub use page::{ImageAttributes, ImageElement, LoadFailure, MemoryPage, NodeId, Page};
