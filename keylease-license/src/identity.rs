//! The identity a license is bound under.

use crate::error::{LicenseError, LicenseResult};
use serde::{Deserialize, Serialize};

/// A license key bound to a device for a product.
///
/// Built once per activation and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseIdentity {
    license_key: String,
    device_id: String,
    product_name: String,
}

impl LicenseIdentity {
    /// Creates an identity. The license key is trimmed.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::EmptyLicenseKey`] if the key is blank.
    pub fn new(
        license_key: impl AsRef<str>,
        device_id: impl Into<String>,
        product_name: impl Into<String>,
    ) -> LicenseResult<Self> {
        let license_key = license_key.as_ref().trim();
        if license_key.is_empty() {
            return Err(LicenseError::EmptyLicenseKey);
        }
        Ok(Self {
            license_key: license_key.to_string(),
            device_id: device_id.into(),
            product_name: product_name.into(),
        })
    }

    /// Returns the license key.
    #[must_use]
    pub fn license_key(&self) -> &str {
        &self.license_key
    }

    /// Returns the device identifier.
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Returns the product name.
    #[must_use]
    pub fn product_name(&self) -> &str {
        &self.product_name
    }

    /// The license key with everything but the last four characters hidden.
    #[must_use]
    pub fn masked_key(&self) -> String {
        let chars: Vec<char> = self.license_key.chars().collect();
        let visible = chars.len().min(4);
        let hidden = chars.len() - visible;
        let tail: String = chars[hidden..].iter().collect();
        format!("{}{tail}", "*".repeat(hidden))
    }

    /// Request body for `/activate`.
    #[must_use]
    pub fn activation_request(&self) -> ActivationRequest<'_> {
        ActivationRequest {
            license_key: &self.license_key,
            device_id: &self.device_id,
            product_name: &self.product_name,
        }
    }

    /// Request body for `/deactivate` and `/heartbeat`.
    #[must_use]
    pub fn device_request(&self) -> DeviceRequest<'_> {
        DeviceRequest {
            license_key: &self.license_key,
            device_id: &self.device_id,
        }
    }
}

/// Body of an activation request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationRequest<'a> {
    pub license_key: &'a str,
    pub device_id: &'a str,
    pub product_name: &'a str,
}

/// Body of a deactivation or heartbeat request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRequest<'a> {
    pub license_key: &'a str,
    pub device_id: &'a str,
}
