use crate::preflight::{CheckStatus, PreflightCheck};
use crate::sandbox::ContainerEngine;
use crate::service::ImageThresholds;

const DEFAULT_WARN_MB: f64 = 500.0;
const DEFAULT_FAIL_MB: f64 = 1000.0;

/// Size check of a built image. A missing image fails the check.
pub async fn analyze_image(
    engine: &dyn ContainerEngine,
    image_name: &str,
    thresholds: Option<&ImageThresholds>,
) -> PreflightCheck {
    let warn_mb = thresholds.and_then(|t| t.warn_mb).unwrap_or(DEFAULT_WARN_MB);
    let fail_mb = thresholds.and_then(|t| t.fail_mb).unwrap_or(DEFAULT_FAIL_MB);

    let Some(info) = engine.inspect_image(image_name).await else {
        return PreflightCheck::new(
            "image-size",
            CheckStatus::Fail,
            format!("Image \"{}\" not found. Build the image first.", image_name),
        );
    };

    let size_mb = (info.size as f64 / 1024.0 / 1024.0).round();

    if size_mb > fail_mb {
        PreflightCheck::new(
            "image-size",
            CheckStatus::Fail,
            format!("Image size {}MB exceeds {}MB limit", size_mb, fail_mb),
        )
        .with_values(size_mb, fail_mb)
    } else if size_mb > warn_mb {
        PreflightCheck::new(
            "image-size",
            CheckStatus::Warn,
            format!("Image size {}MB exceeds recommended {}MB", size_mb, warn_mb),
        )
        .with_values(size_mb, warn_mb)
    } else {
        PreflightCheck::new(
            "image-size",
            CheckStatus::Pass,
            format!("Image size {}MB is within limits", size_mb),
        )
        .with_values(size_mb, warn_mb)
    }
}
