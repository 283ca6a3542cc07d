//! Settings edits and the outward settings tree
//!
//! Every edit coming out of the settings editor is a path plus a value. The
//! first path segment only names the group the field is shown in; the rest
//! addresses a [`ConfigField`].

pub mod tree;

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::Config;

pub use tree::{build_settings_tree, FieldInput, SelectOption, SettingsField, SettingsGroup, SettingsTree};

/// Addressable configuration fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigField {
    DeviceId,
    Width,
    Height,
    FrameRate,
    PublishRate,
    Compressed,
    PublishMode,
    PubTopic,
    PublishFrameId,
}

impl ConfigField {
    pub const ALL: [ConfigField; 9] = [
        ConfigField::DeviceId,
        ConfigField::Width,
        ConfigField::Height,
        ConfigField::FrameRate,
        ConfigField::PublishRate,
        ConfigField::Compressed,
        ConfigField::PublishMode,
        ConfigField::PubTopic,
        ConfigField::PublishFrameId,
    ];

    /// Key used in the settings tree and in edit paths
    pub fn key(&self) -> &'static str {
        match self {
            ConfigField::DeviceId => "deviceName",
            ConfigField::Width => "width",
            ConfigField::Height => "height",
            ConfigField::FrameRate => "frameRate",
            ConfigField::PublishRate => "publishRate",
            ConfigField::Compressed => "compressed",
            ConfigField::PublishMode => "publishMode",
            ConfigField::PubTopic => "pubTopic",
            ConfigField::PublishFrameId => "publishFrameId",
        }
    }

    fn from_key(key: &str) -> Option<Self> {
        match key {
            "deviceName" | "deviceId" => Some(ConfigField::DeviceId),
            "width" => Some(ConfigField::Width),
            "height" => Some(ConfigField::Height),
            "frameRate" => Some(ConfigField::FrameRate),
            "publishRate" | "pubRate" => Some(ConfigField::PublishRate),
            "compressed" => Some(ConfigField::Compressed),
            "publishMode" => Some(ConfigField::PublishMode),
            "pubTopic" => Some(ConfigField::PubTopic),
            "publishFrameId" => Some(ConfigField::PublishFrameId),
            _ => None,
        }
    }

    /// Resolve an edit path (group prefix included) to a field.
    ///
    /// Paths of any depth are accepted. Segments after the group prefix are
    /// joined with `.`; the schema is flat today, so only single-segment
    /// remainders resolve.
    pub fn from_path<S: AsRef<str>>(path: &[S]) -> Option<Self> {
        let rest = path.get(1..)?;
        let key = rest
            .iter()
            .map(|segment| segment.as_ref())
            .collect::<Vec<_>>()
            .join(".");
        Self::from_key(&key)
    }

    /// Current value of this field in `config`
    pub fn get(&self, config: &Config) -> FieldValue {
        match self {
            ConfigField::DeviceId => FieldValue::Text(config.device_id.clone()),
            ConfigField::Width => FieldValue::Number(config.width as f64),
            ConfigField::Height => FieldValue::Number(config.height as f64),
            ConfigField::FrameRate => FieldValue::Number(config.frame_rate),
            ConfigField::PublishRate => FieldValue::Number(config.publish_rate),
            ConfigField::Compressed => FieldValue::Bool(config.compressed),
            ConfigField::PublishMode => FieldValue::Bool(config.publish_mode),
            ConfigField::PubTopic => FieldValue::Text(config.pub_topic.clone()),
            ConfigField::PublishFrameId => FieldValue::Text(config.publish_frame_id.clone()),
        }
    }

    /// Copy of `config` with this field replaced, or `None` when the value
    /// has the wrong shape for the field.
    pub fn set(&self, config: &Config, value: &FieldValue) -> Option<Config> {
        let mut next = config.clone();
        match (self, value) {
            (ConfigField::DeviceId, FieldValue::Text(v)) => next.device_id = v.clone(),
            (ConfigField::Width, FieldValue::Number(v)) => next.width = to_dimension(*v),
            (ConfigField::Height, FieldValue::Number(v)) => next.height = to_dimension(*v),
            (ConfigField::FrameRate, FieldValue::Number(v)) => next.frame_rate = *v,
            (ConfigField::PublishRate, FieldValue::Number(v)) => next.publish_rate = *v,
            (ConfigField::Compressed, FieldValue::Bool(v)) => next.compressed = *v,
            (ConfigField::PublishMode, FieldValue::Bool(v)) => next.publish_mode = *v,
            (ConfigField::PubTopic, FieldValue::Text(v)) => next.pub_topic = v.clone(),
            (ConfigField::PublishFrameId, FieldValue::Text(v)) => {
                next.publish_frame_id = v.clone()
            }
            _ => return None,
        }
        Some(next)
    }
}

impl fmt::Display for ConfigField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

// `as` saturates: negatives and NaN land on 0, which the sampler rejects.
fn to_dimension(value: f64) -> u32 {
    value.round() as u32
}

/// Value carried by a settings edit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Number(value)
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        FieldValue::Number(value as f64)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

/// A single "update" action from the settings editor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsEdit {
    pub path: Vec<String>,
    pub value: FieldValue,
}

impl SettingsEdit {
    pub fn new<P, S>(path: P, value: impl Into<FieldValue>) -> Self
    where
        P: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            path: path.into_iter().map(Into::into).collect(),
            value: value.into(),
        }
    }

    /// Edit addressed at `field` inside its settings group
    pub fn for_field(field: ConfigField, value: impl Into<FieldValue>) -> Self {
        Self::new([tree::group_of(field), field.key()], value)
    }
}

/// Apply one edit, returning the next configuration.
///
/// `current` is left untouched. Unknown paths and mistyped values produce an
/// identical copy; no range checks happen here.
pub fn apply_edit(current: &Config, edit: &SettingsEdit) -> Config {
    let Some(field) = ConfigField::from_path(&edit.path) else {
        warn!(path = ?edit.path, "Ignoring edit for unknown settings path");
        return current.clone();
    };

    match field.set(current, &edit.value) {
        Some(next) => next,
        None => {
            warn!(%field, value = ?edit.value, "Ignoring edit with mismatched value type");
            current.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_width_edit_replaces_only_width() {
        let original = Config::default();
        let edit = SettingsEdit::new(["dataSource", "width"], 1024u32);

        let next = apply_edit(&original, &edit);

        assert_eq!(next.width, 1024);
        assert_eq!(original.width, 800);
        assert_eq!(Config { width: 800, ..next.clone() }, original);
    }

    #[test]
    fn test_group_prefix_is_cosmetic() {
        let original = Config::default();
        let a = apply_edit(&original, &SettingsEdit::new(["publish", "pubTopic"], "/a"));
        let b = apply_edit(&original, &SettingsEdit::new(["anything", "pubTopic"], "/a"));
        assert_eq!(a, b);
        assert_eq!(a.pub_topic, "/a");
    }

    #[test]
    fn test_unknown_or_nested_path_is_noop() {
        let original = Config::default();
        for path in [
            vec!["publish", "nope"],
            vec!["publish", "pubTopic", "inner"],
            vec!["publish"],
            vec![],
        ] {
            let edit = SettingsEdit::new(path, "x");
            assert_eq!(apply_edit(&original, &edit), original);
        }
    }

    #[test]
    fn test_mismatched_type_is_noop() {
        let original = Config::default();
        let edit = SettingsEdit::new(["publish", "publishMode"], "yes");
        assert_eq!(apply_edit(&original, &edit), original);
    }

    #[test]
    fn test_out_of_range_values_are_stored() {
        let original = Config::default();
        let next = apply_edit(&original, &SettingsEdit::new(["publish", "publishRate"], -3.0));
        assert_eq!(next.publish_rate, -3.0);

        let next = apply_edit(&original, &SettingsEdit::new(["dataSource", "height"], -10.0));
        assert_eq!(next.height, 0);
    }

    #[test]
    fn test_legacy_field_aliases() {
        let original = Config::default();
        let next = apply_edit(&original, &SettingsEdit::new(["dataSource", "deviceId"], "cam"));
        assert_eq!(next.device_id, "cam");
        let next = apply_edit(&original, &SettingsEdit::new(["publish", "pubRate"], 2.0));
        assert_eq!(next.publish_rate, 2.0);
    }

    #[test]
    fn test_field_get_set_agree() {
        let config = Config::default();
        for field in ConfigField::ALL {
            let value = field.get(&config);
            assert_eq!(field.set(&config, &value), Some(config.clone()), "{field}");
        }
    }

    #[test]
    fn test_for_field_uses_tree_group() {
        let edit = SettingsEdit::for_field(ConfigField::PubTopic, "/x");
        assert_eq!(edit.path, vec!["publish".to_string(), "pubTopic".to_string()]);
    }
}
