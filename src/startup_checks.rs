use crate::Config;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum StartupCheckError {
    #[error("Font file does not exist: {0:?}")]
    FontMissing(PathBuf),

    #[error("Invalid style setting: {0}")]
    InvalidStyle(String),

    #[error("Default JPEG quality must be between 1 and 100, got {0}")]
    InvalidJpegQuality(u8),

    #[error("Input directory does not exist: {0:?}")]
    InputDirectoryMissing(PathBuf),

    #[error("Failed to create output directory: {0}")]
    OutputDirectoryCreationFailed(#[from] std::io::Error),
}

impl StartupCheckError {
    /// Whether the process should refuse to start.
    pub fn is_critical(&self) -> bool {
        !matches!(self, StartupCheckError::InvalidJpegQuality(_))
    }
}

/// Which parts of the configuration the upcoming run depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckScope {
    Serve,
    Batch,
}

pub async fn perform_startup_checks(
    config: &Config,
    scope: CheckScope,
) -> Result<(), Vec<StartupCheckError>> {
    let mut errors = Vec::new();

    info!("Performing startup checks...");

    // Fonts
    if config.fonts.primary_path.exists() {
        info!("Primary font found: {:?}", config.fonts.primary_path);
    } else {
        error!("Primary font missing: {:?}", config.fonts.primary_path);
        errors.push(StartupCheckError::FontMissing(
            config.fonts.primary_path.clone(),
        ));
    }
    if !config.fonts.secondary_path.exists() {
        warn!(
            "Secondary font missing, location lines will use the primary font: {:?}",
            config.fonts.secondary_path
        );
    }

    // Style
    let style = &config.style;
    let size_ratios = [
        ("primary_size_ratio", style.primary_size_ratio),
        ("secondary_size_ratio", style.secondary_size_ratio),
    ];
    for (name, value) in size_ratios {
        if !(value.is_finite() && value > 0.0 && value < 1.0) {
            errors.push(StartupCheckError::InvalidStyle(format!(
                "{} must be in (0, 1), got {}",
                name, value
            )));
        }
    }
    let spacing_ratios = [
        ("margin_ratio", style.margin_ratio),
        ("padding_ratio", style.padding_ratio),
    ];
    for (name, value) in spacing_ratios {
        if !(value.is_finite() && value >= 0.0 && value < 1.0) {
            errors.push(StartupCheckError::InvalidStyle(format!(
                "{} must be in [0, 1), got {}",
                name, value
            )));
        }
    }
    if !(style.line_spacing.is_finite() && style.line_spacing >= 1.0) {
        errors.push(StartupCheckError::InvalidStyle(format!(
            "line_spacing must be at least 1.0, got {}",
            style.line_spacing
        )));
    }
    if !(style.blur_radius.is_finite() && style.blur_radius >= 0.0) {
        errors.push(StartupCheckError::InvalidStyle(format!(
            "blur_radius must not be negative, got {}",
            style.blur_radius
        )));
    }

    if !(1..=100).contains(&config.jpeg.default_quality) {
        warn!(
            "Default JPEG quality {} out of range",
            config.jpeg.default_quality
        );
        errors.push(StartupCheckError::InvalidJpegQuality(
            config.jpeg.default_quality,
        ));
    }

    if scope == CheckScope::Batch {
        let input_dir = &config.paths.input_directory;
        if input_dir.is_dir() {
            info!("Input directory exists: {:?}", input_dir);
        } else {
            error!("Input directory does not exist: {:?}", input_dir);
            errors.push(StartupCheckError::InputDirectoryMissing(input_dir.clone()));
        }

        let output_dir = &config.paths.output_directory;
        if !output_dir.exists() {
            info!("Output directory does not exist, creating: {:?}", output_dir);
            if let Err(e) = tokio::fs::create_dir_all(output_dir).await {
                error!("Failed to create output directory: {}", e);
                errors.push(StartupCheckError::OutputDirectoryCreationFailed(e));
            }
        }
    }

    if errors.is_empty() {
        info!("All startup checks passed");
        Ok(())
    } else {
        error!("Startup checks failed with {} errors", errors.len());
        Err(errors)
    }
}
