//! Device configuration and the validation contract for portal submissions.
//!
//! The captive portal hands over raw strings ([`ConfigForm`]). They only
//! become a [`Configuration`] after [`validate`] accepts them, so a
//! `Configuration` value is always fully valid.

use serde::{Deserialize, Serialize};

/// Version tag of the persisted configuration layout (at most 4 bytes).
///
/// Must change whenever fields are added, renamed or reordered. A stored blob
/// carrying a different tag is treated as absent.
pub const CONFIG_VERSION: &str = "0100";

/// Topic prefix used when the form leaves it blank.
pub const DEFAULT_TOPIC_PREFIX: &str = "ancs2mqtt";

/// Port pre-filled into an empty form.
pub const DEFAULT_PORT: &str = "1883";

/// Value the portal's reset checkbox submits when ticked.
pub const RESET_SELECTED: &str = "selected";

/// Raw values as submitted through the captive portal form.
///
/// Field names on the wire are the short parameter ids the portal renders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigForm {
    /// Identifier of the paired device, used as a topic segment.
    #[serde(rename = "iosd", default)]
    pub device_id: String,

    #[serde(rename = "mqth", default)]
    pub host: String,

    #[serde(rename = "mqtp", default)]
    pub port: String,

    #[serde(rename = "mqtu", default)]
    pub username: String,

    #[serde(rename = "mqtP", default)]
    pub password: String,

    /// Optional topic prefix; blank means [`DEFAULT_TOPIC_PREFIX`].
    #[serde(rename = "mqtx", default)]
    pub topic_prefix: String,

    #[serde(default)]
    pub ssid: String,

    #[serde(rename = "wifipass", default)]
    pub wifi_password: String,

    /// Reset checkbox. Unticked checkboxes are not submitted at all.
    #[serde(rename = "rset", default)]
    pub reset: String,
}

impl ConfigForm {
    /// Whether the reset checkbox was ticked.
    pub fn reset_requested(&self) -> bool {
        self.reset == RESET_SELECTED
    }
}

/// WiFi station credentials provisioned through the portal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiCredentials {
    pub ssid: String,
    pub password: String,
}

/// A validated device configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    /// MQTT broker hostname or IP address.
    pub host: String,

    /// MQTT broker port.
    pub port: u16,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Paired device identifier. Never contains `/`.
    pub device_id: String,

    pub topic_prefix: String,

    #[serde(default)]
    pub wifi: WifiCredentials,

    /// Set when the user asked for a factory reset. Consumed on next boot.
    #[serde(default)]
    pub reset_requested: bool,
}

impl Configuration {
    /// Re-check a configuration that did not come through [`validate`],
    /// e.g. one decoded from storage.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate(&self.to_form()).map(|_| ())
    }

    /// Render back into form values, for pre-filling the portal page.
    pub fn to_form(&self) -> ConfigForm {
        ConfigForm {
            device_id: self.device_id.clone(),
            host: self.host.clone(),
            port: self.port.to_string(),
            username: self.username.clone().unwrap_or_default(),
            password: self.password.clone().unwrap_or_default(),
            topic_prefix: self.topic_prefix.clone(),
            ssid: self.wifi.ssid.clone(),
            wifi_password: self.wifi.password.clone(),
            reset: if self.reset_requested {
                RESET_SELECTED.to_string()
            } else {
                String::new()
            },
        }
    }

    /// Credentials to present to the broker.
    ///
    /// A password wins over a bare username; with neither the session is
    /// anonymous.
    pub fn credentials(&self) -> Credentials<'_> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (user, Some(password)) => Credentials::UserPassword {
                username: user.unwrap_or(""),
                password,
            },
            (Some(username), None) => Credentials::User { username },
            (None, None) => Credentials::Anonymous,
        }
    }
}

/// Authentication used for a broker connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Credentials<'a> {
    Anonymous,
    User { username: &'a str },
    UserPassword { username: &'a str, password: &'a str },
}

/// Which validation rule rejected a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidHost,
    InvalidPort,
    InvalidDeviceId,
    InvalidTopicPrefix,
}

impl ErrorKind {
    /// Form field id the error belongs to.
    pub fn field(self) -> &'static str {
        match self {
            ErrorKind::InvalidHost => "mqth",
            ErrorKind::InvalidPort => "mqtp",
            ErrorKind::InvalidDeviceId => "iosd",
            ErrorKind::InvalidTopicPrefix => "mqtx",
        }
    }

    /// Message shown next to the offending field.
    pub fn message(self) -> &'static str {
        match self {
            ErrorKind::InvalidHost => "Please provide at least 3 characters.",
            ErrorKind::InvalidPort => "Invalid port number.",
            ErrorKind::InvalidDeviceId => {
                "Please provide at least one character, and no slashes ('/')."
            }
            ErrorKind::InvalidTopicPrefix => {
                "No wildcards ('+', '#'), empty levels, or leading or trailing slashes."
            }
        }
    }
}

/// A rejected portal submission.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub kind: ErrorKind,
    pub field: &'static str,
    pub message: &'static str,
}

impl From<ErrorKind> for ValidationError {
    fn from(kind: ErrorKind) -> Self {
        Self {
            kind,
            field: kind.field(),
            message: kind.message(),
        }
    }
}

/// Validate raw form values and build a [`Configuration`] from them.
///
/// Rules are checked in form order and the first failing one is reported.
pub fn validate(form: &ConfigForm) -> Result<Configuration, ValidationError> {
    if form.host.chars().count() < 3 {
        return Err(ErrorKind::InvalidHost.into());
    }

    let port = parse_port(&form.port).ok_or(ErrorKind::InvalidPort)?;

    if form.device_id.is_empty() || form.device_id.contains('/') {
        return Err(ErrorKind::InvalidDeviceId.into());
    }

    let topic_prefix = match form.topic_prefix.trim() {
        "" => DEFAULT_TOPIC_PREFIX.to_string(),
        prefix if is_topic_prefix(prefix) => prefix.to_string(),
        _ => return Err(ErrorKind::InvalidTopicPrefix.into()),
    };

    Ok(Configuration {
        host: form.host.clone(),
        port,
        username: non_empty(&form.username),
        password: non_empty(&form.password),
        device_id: form.device_id.clone(),
        topic_prefix,
        wifi: WifiCredentials {
            ssid: form.ssid.clone(),
            password: form.wifi_password.clone(),
        },
        reset_requested: form.reset_requested(),
    })
}

fn parse_port(raw: &str) -> Option<u16> {
    raw.trim().parse::<u16>().ok().filter(|port| *port != 0)
}

/// Every level is non-empty and free of MQTT wildcards.
fn is_topic_prefix(prefix: &str) -> bool {
    prefix
        .split('/')
        .all(|level| !level.is_empty() && !level.contains(['+', '#']))
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}
