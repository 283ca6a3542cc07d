//! Two-group settings tree shown by the host settings editor

use serde::Serialize;

use super::{ConfigField, FieldValue};
use crate::devices::DeviceOption;
use crate::Config;

pub const DATA_SOURCE_GROUP: &str = "dataSource";
pub const PUBLISH_GROUP: &str = "publish";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettingsTree {
    pub groups: Vec<SettingsGroup>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettingsGroup {
    pub key: &'static str,
    pub label: &'static str,
    pub fields: Vec<SettingsField>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettingsField {
    pub field: ConfigFieldKey,
    pub label: &'static str,
    pub input: FieldInput,
    pub value: FieldValue,
    /// Path to send back in a [`super::SettingsEdit`]
    pub path: [&'static str; 2],
}

/// Serializable name of a [`ConfigField`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ConfigFieldKey(&'static str);

impl From<ConfigField> for ConfigFieldKey {
    fn from(field: ConfigField) -> Self {
        ConfigFieldKey(field.key())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "input", rename_all = "lowercase")]
pub enum FieldInput {
    Select { options: Vec<SelectOption> },
    Number,
    String,
    Boolean,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectOption {
    pub label: String,
    pub value: String,
}

pub(crate) fn group_of(field: ConfigField) -> &'static str {
    match field {
        ConfigField::DeviceId | ConfigField::Width | ConfigField::Height | ConfigField::FrameRate => {
            DATA_SOURCE_GROUP
        }
        ConfigField::PublishRate
        | ConfigField::Compressed
        | ConfigField::PublishMode
        | ConfigField::PubTopic
        | ConfigField::PublishFrameId => PUBLISH_GROUP,
    }
}

fn label_of(field: ConfigField) -> &'static str {
    match field {
        ConfigField::DeviceId => "Device Name",
        ConfigField::Width => "Width",
        ConfigField::Height => "Height",
        ConfigField::FrameRate => "Frame Rate",
        ConfigField::PublishRate => "Publish Rate",
        ConfigField::Compressed => "Compressed",
        ConfigField::PublishMode => "Publish Mode",
        ConfigField::PubTopic => "Pub Topic",
        ConfigField::PublishFrameId => "Image Frame ID",
    }
}

fn field_entry(config: &Config, field: ConfigField, input: FieldInput) -> SettingsField {
    SettingsField {
        field: field.into(),
        label: label_of(field),
        input,
        value: field.get(config),
        path: [group_of(field), field.key()],
    }
}

/// Build the tree for the current configuration and device options.
///
/// The device select always offers "Default" (empty id) first.
pub fn build_settings_tree(config: &Config, devices: &[DeviceOption]) -> SettingsTree {
    let mut options = Vec::with_capacity(devices.len() + 1);
    options.push(SelectOption {
        label: "Default".to_string(),
        value: String::new(),
    });
    options.extend(devices.iter().map(|device| SelectOption {
        label: device.label.clone(),
        value: device.id.clone(),
    }));

    let data_source = SettingsGroup {
        key: DATA_SOURCE_GROUP,
        label: "Data Source",
        fields: vec![
            field_entry(config, ConfigField::DeviceId, FieldInput::Select { options }),
            field_entry(config, ConfigField::Width, FieldInput::Number),
            field_entry(config, ConfigField::Height, FieldInput::Number),
            field_entry(config, ConfigField::FrameRate, FieldInput::Number),
        ],
    };

    let publish = SettingsGroup {
        key: PUBLISH_GROUP,
        label: "Publish",
        fields: vec![
            field_entry(config, ConfigField::PublishMode, FieldInput::Boolean),
            field_entry(config, ConfigField::Compressed, FieldInput::Boolean),
            field_entry(config, ConfigField::PubTopic, FieldInput::String),
            field_entry(config, ConfigField::PublishFrameId, FieldInput::String),
            field_entry(config, ConfigField::PublishRate, FieldInput::Number),
        ],
    };

    SettingsTree {
        groups: vec![data_source, publish],
    }
}
