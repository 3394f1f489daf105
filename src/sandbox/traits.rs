use async_trait::async_trait;

use crate::error::Result;
use crate::sandbox::{BuildRequest, ImageInfo, RunRequest, RunResult};

/// Trait for container engines that build and run service images.
///
/// Implementations are stateless translators from requests to engine
/// invocations. Isolation itself is delegated to the engine.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Returns the engine name (e.g., "docker")
    fn name(&self) -> &str;

    /// Lightweight probe. Any failure means unavailable.
    async fn is_available(&self) -> bool;

    /// Build an image from a recipe and context directory.
    async fn build(&self, request: &BuildRequest) -> Result<()>;

    /// Run a container to completion or until the request timeout expires.
    ///
    /// A timeout is not an error: it yields exit code 124.
    async fn run(&self, request: &RunRequest) -> Result<RunResult>;

    /// Image metadata, or `None` when the image does not exist.
    async fn inspect_image(&self, image: &str) -> Option<ImageInfo>;
}
