//! Configuration loading entry points.

use super::merge::merge_policy;
use super::sources::{env, global_file, workspace_file};
use super::DataPrivacyConfig;
use crate::error::PrivacyError;
use config::{Config, File};
use std::path::{Path, PathBuf};

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load every layer for `workspace_root`.
    pub fn load(workspace_root: &Path) -> Result<DataPrivacyConfig, PrivacyError> {
        let global = global_file::global_config_path();
        Self::load_layers(global.as_deref(), workspace_root)
    }

    /// Load with an explicit global file path instead of the user's config directory.
    pub fn load_layers(
        global: Option<&Path>,
        workspace_root: &Path,
    ) -> Result<DataPrivacyConfig, PrivacyError> {
        let builder = merge_policy::builder_with_defaults()?;
        let builder = global_file::add_to_builder(builder, global)?;
        let builder = workspace_file::add_to_builder(builder, workspace_root)?;
        let builder = env::add_to_builder(builder);
        Ok(builder.build()?.try_deserialize()?)
    }

    /// Load a single file on top of the defaults, ignoring every other layer.
    pub fn load_from_file(path: &Path) -> Result<DataPrivacyConfig, PrivacyError> {
        let config = merge_policy::builder_with_defaults()?
            .add_source(File::from(path.to_path_buf()))
            .build()?;
        Ok(config.try_deserialize()?)
    }

    pub fn xdg_config_path() -> Option<PathBuf> {
        global_file::global_config_path()
    }

    /// Defaults only.
    pub fn defaults() -> Result<DataPrivacyConfig, PrivacyError> {
        let config: Config = merge_policy::builder_with_defaults()?.build()?;
        Ok(config.try_deserialize()?)
    }
}
