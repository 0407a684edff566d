// Pipeline events
//
// Wire format: { "type": "image.uploaded", "data": { ... } } with camelCase
// fields inside `data`.

use serde::{Deserialize, Serialize};

use crate::presets::DEFAULT_PRESET;

fn default_preset() -> String {
    DEFAULT_PRESET.to_string()
}

/// An upload finished and the image should be restored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageUploaded {
    pub image_id: String,
    #[serde(default = "default_preset")]
    pub preset: String,
    pub user_id: String,
}

/// A payment succeeded; refill the user's credits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingTopup {
    pub user_id: String,
}

/// First contact from a user; grant the opening credits if they have no account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountOpened {
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PipelineEvent {
    #[serde(rename = "image.uploaded")]
    ImageUploaded(ImageUploaded),
    #[serde(rename = "billing.topup")]
    BillingTopup(BillingTopup),
    #[serde(rename = "account.opened")]
    AccountOpened(AccountOpened),
}

impl PipelineEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ImageUploaded(_) => "image.uploaded",
            Self::BillingTopup(_) => "billing.topup",
            Self::AccountOpened(_) => "account.opened",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_image_uploaded() {
        let event: PipelineEvent = serde_json::from_value(json!({
            "type": "image.uploaded",
            "data": { "imageId": "img_1", "preset": "denoise", "userId": "user_1" }
        }))
        .unwrap();

        assert_eq!(
            event,
            PipelineEvent::ImageUploaded(ImageUploaded {
                image_id: "img_1".into(),
                preset: "denoise".into(),
                user_id: "user_1".into(),
            })
        );
        assert_eq!(event.event_type(), "image.uploaded");
    }

    #[test]
    fn test_missing_preset_uses_default() {
        let event: ImageUploaded =
            serde_json::from_value(json!({ "imageId": "img_1", "userId": "u" })).unwrap();
        assert_eq!(event.preset, DEFAULT_PRESET);
    }

    #[test]
    fn test_parse_billing_events() {
        let topup: PipelineEvent = serde_json::from_value(json!({
            "type": "billing.topup",
            "data": { "userId": "user_1" }
        }))
        .unwrap();
        assert_eq!(topup.event_type(), "billing.topup");

        let opened: PipelineEvent = serde_json::from_value(json!({
            "type": "account.opened",
            "data": { "userId": "user_1" }
        }))
        .unwrap();
        assert_eq!(
            opened,
            PipelineEvent::AccountOpened(AccountOpened {
                user_id: "user_1".into()
            })
        );
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let parsed = serde_json::from_value::<PipelineEvent>(json!({
            "type": "image.deleted",
            "data": {}
        }));
        assert!(parsed.is_err());
    }
}
