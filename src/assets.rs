use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{document::FontKey, error::ContextError};

/// Anything able to hand out the bytes of a named asset (template or font). Paths follow
/// the convention of `AssetConfiguration`, e.g. `certificates/certificate1.pdf`.
pub trait AssetSource {
    fn fetch(&self, asset_path: &str) -> Result<Vec<u8>, ContextError>;
}

/// Assets read from a directory on disk.
#[derive(Debug, Clone)]
pub struct FileSystemAssets {
    root: PathBuf,
}

impl FileSystemAssets {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        FileSystemAssets { root: root.into() }
    }
}

impl AssetSource for FileSystemAssets {
    fn fetch(&self, asset_path: &str) -> Result<Vec<u8>, ContextError> {
        let path = self.root.join(asset_path.trim_start_matches('/'));
        std::fs::read(&path).map_err(|error| {
            ContextError::with_error(format!("Unable to read the asset {:?}", path), &error)
        })
    }
}

/// Assets kept in memory, for callers that cache template and font bytes between renders.
#[derive(Debug, Clone, Default)]
pub struct InMemoryAssets {
    assets: HashMap<String, Vec<u8>>,
}

impl InMemoryAssets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<S: Into<String>>(&mut self, asset_path: S, bytes: Vec<u8>) {
        let asset_path: String = asset_path.into();
        self.assets
            .insert(asset_path.trim_start_matches('/').to_string(), bytes);
    }

    pub fn with_asset<S: Into<String>>(mut self, asset_path: S, bytes: Vec<u8>) -> Self {
        self.insert(asset_path, bytes);
        self
    }
}

impl AssetSource for InMemoryAssets {
    fn fetch(&self, asset_path: &str) -> Result<Vec<u8>, ContextError> {
        self.assets
            .get(asset_path.trim_start_matches('/'))
            .cloned()
            .ok_or(ContextError::with_context(format!(
                "The asset {:?} is not available",
                asset_path
            )))
    }
}

/// The binary templates known to the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TemplateAsset {
    Certificate1,
    Certificate2,
    Certificate3,
    IdCard,
    VisitingCardDark,
    VisitingCardLight,
}

impl TemplateAsset {
    /// The name used in error reports and default file names.
    pub fn name(&self) -> &'static str {
        match self {
            TemplateAsset::Certificate1 => "certificate1",
            TemplateAsset::Certificate2 => "certificate2",
            TemplateAsset::Certificate3 => "certificate3",
            TemplateAsset::IdCard => "idcard",
            TemplateAsset::VisitingCardDark => "visitingcard-dark",
            TemplateAsset::VisitingCardLight => "visitingcard-light",
        }
    }

    fn default_path(&self) -> &'static str {
        match self {
            TemplateAsset::Certificate1 => "certificates/certificate1.pdf",
            TemplateAsset::Certificate2 => "certificates/certificate2.pdf",
            TemplateAsset::Certificate3 => "certificates/certificate3.pdf",
            TemplateAsset::IdCard => "idcard/idcard.pdf",
            TemplateAsset::VisitingCardDark => "visitingcard/dark.pdf",
            TemplateAsset::VisitingCardLight => "visitingcard/light.pdf",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct FontAssociation {
    pub font_key: FontKey,
    pub font_file_path: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TemplateAssociation {
    pub template: TemplateAsset,
    pub template_file_path: String,
}

/// Where the renderer finds its templates and fonts. Every association is optional: the
/// defaults follow the `fonts/`, `certificates/`, `idcard/` and `visitingcard/` layout.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AssetConfiguration {
    #[serde(default = "default_asset_root")]
    pub asset_root: PathBuf,
    #[serde(default)]
    pub font_associations: Vec<FontAssociation>,
    #[serde(default)]
    pub template_associations: Vec<TemplateAssociation>,
    /// Pause between two consecutive files written by a batch.
    #[serde(default = "default_save_interval_milliseconds")]
    pub save_interval_milliseconds: u64,
}

fn default_asset_root() -> PathBuf {
    PathBuf::from("public")
}

fn default_save_interval_milliseconds() -> u64 {
    300
}

impl Default for AssetConfiguration {
    fn default() -> Self {
        AssetConfiguration {
            asset_root: default_asset_root(),
            font_associations: Vec::new(),
            template_associations: Vec::new(),
            save_interval_milliseconds: default_save_interval_milliseconds(),
        }
    }
}

impl AssetConfiguration {
    pub fn from_path(configuration_file_path: &Path) -> Result<Self, ContextError> {
        let configuration_file_contents = std::fs::read_to_string(configuration_file_path)
            .map_err(|error| {
                ContextError::with_error("Failed to read the asset configuration file", &error)
            })?;
        let configuration: AssetConfiguration = serde_json::from_str(&configuration_file_contents)
            .map_err(|error| {
                ContextError::with_error("Failed to parse the asset configuration file", &error)
            })?;

        Ok(configuration)
    }

    pub fn get_font_path(&self, font_key: FontKey) -> String {
        self.font_associations
            .iter()
            .find(|font_association| font_association.font_key == font_key)
            .map(|font_association| font_association.font_file_path.clone())
            .unwrap_or_else(|| font_key.default_path().to_string())
    }

    pub fn get_template_path(&self, template: TemplateAsset) -> String {
        self.template_associations
            .iter()
            .find(|template_association| template_association.template == template)
            .map(|template_association| template_association.template_file_path.clone())
            .unwrap_or_else(|| template.default_path().to_string())
    }

    pub fn save_interval(&self) -> Duration {
        Duration::from_millis(self.save_interval_milliseconds)
    }

    /// A file system source rooted at the configured asset root.
    pub fn file_system_assets(&self) -> FileSystemAssets {
        FileSystemAssets::new(self.asset_root.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn associations_override_the_path_convention() {
        let configuration: AssetConfiguration = serde_json::from_str(
            r#"{
                "fontAssociations": [
                    { "fontKey": "semi-bold", "fontFilePath": "custom/Bold.ttf" }
                ],
                "templateAssociations": [
                    { "template": "visiting-card-dark", "templateFilePath": "cards/night.pdf" }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(configuration.asset_root, PathBuf::from("public"));
        assert_eq!(configuration.save_interval(), Duration::from_millis(300));
        assert_eq!(configuration.get_font_path(FontKey::SemiBold), "custom/Bold.ttf");
        assert_eq!(
            configuration.get_font_path(FontKey::Regular),
            "fonts/Sora-Regular.ttf"
        );
        assert_eq!(
            configuration.get_template_path(TemplateAsset::VisitingCardDark),
            "cards/night.pdf"
        );
        assert_eq!(
            configuration.get_template_path(TemplateAsset::Certificate2),
            "certificates/certificate2.pdf"
        );
    }

    #[test]
    fn missing_in_memory_asset_is_reported() {
        let assets = InMemoryAssets::new().with_asset("/fonts/a.ttf", vec![1, 2, 3]);
        assert_eq!(assets.fetch("fonts/a.ttf").unwrap(), vec![1, 2, 3]);
        assert!(assets.fetch("fonts/b.ttf").is_err());
    }
}
