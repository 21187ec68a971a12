//! # Configuration
//!
//! Tunables for an [`Assembly`](crate::Assembly).
//!
//! ## Environment Variables
//!
//! - `REFLEX_MAX_IMAGES`: maximum number of registered images (default: 64)
//! - `REFLEX_TYPE_UNITS`: also index `.debug_types` units (`1`/`true`, default: off)

use std::env;

/// Default maximum number of images an assembly tracks.
pub const DEFAULT_MAX_IMAGES: usize = 64;

/// Assembly configuration
///
/// ## Example
///
/// ```rust
/// use reflex_core::AssemblyConfig;
///
/// let config = AssemblyConfig::default().with_max_images(4);
/// assert_eq!(config.max_images(), 4);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyConfig
{
    max_images: usize,
    index_type_units: bool,
}

impl Default for AssemblyConfig
{
    fn default() -> Self
    {
        Self {
            max_images: DEFAULT_MAX_IMAGES,
            index_type_units: false,
        }
    }
}

impl AssemblyConfig
{
    /// Read configuration from the environment, falling back to defaults.
    ///
    /// Unparseable values are ignored with a warning.
    #[must_use]
    pub fn from_env() -> Self
    {
        let mut config = Self::default();

        if let Ok(raw) = env::var("REFLEX_MAX_IMAGES") {
            match raw.trim().parse::<usize>() {
                Ok(max) if max > 0 => config.max_images = max,
                _ => tracing::warn!(value = %raw, "ignoring invalid REFLEX_MAX_IMAGES"),
            }
        }

        if let Ok(raw) = env::var("REFLEX_TYPE_UNITS") {
            config.index_type_units = matches!(raw.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }

        config
    }

    /// Set the maximum number of images (primary included). Zero is clamped to one.
    #[must_use]
    pub fn with_max_images(mut self, max_images: usize) -> Self
    {
        self.max_images = max_images.max(1);
        self
    }

    /// Also index `.debug_types` type units.
    #[must_use]
    pub fn with_type_units(mut self, enabled: bool) -> Self
    {
        self.index_type_units = enabled;
        self
    }

    pub fn max_images(&self) -> usize
    {
        self.max_images
    }

    pub fn index_type_units(&self) -> bool
    {
        self.index_type_units
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_default_config()
    {
        let config = AssemblyConfig::default();
        assert_eq!(config.max_images(), DEFAULT_MAX_IMAGES);
        assert!(!config.index_type_units());
    }

    #[test]
    fn test_builder_setters()
    {
        let config = AssemblyConfig::default().with_max_images(0).with_type_units(true);
        assert_eq!(config.max_images(), 1);
        assert!(config.index_type_units());
    }
}
