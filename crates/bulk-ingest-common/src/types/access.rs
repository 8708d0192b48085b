use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;
use url::Url;

use crate::error::{CommonError, Result};

/// Permission bitmask carried by an access policy.
///
/// The numeric values match the service's wire representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessPermissions(u32);

impl AccessPermissions {
    pub const NONE: Self = Self(0);
    pub const READ: Self = Self(1);
    pub const WRITE: Self = Self(2);
    pub const DELETE: Self = Self(4);
    pub const LIST: Self = Self(8);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for AccessPermissions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for AccessPermissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = [
            (Self::READ, "Read"),
            (Self::WRITE, "Write"),
            (Self::DELETE, "Delete"),
            (Self::LIST, "List"),
        ]
        .iter()
        .filter(|(flag, _)| self.contains(*flag))
        .map(|(_, name)| *name)
        .collect();

        if names.is_empty() {
            write!(f, "None")
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}

/// A permission + duration grant used to mint locators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AccessPolicy {
    pub id: String,
    pub name: String,
    pub duration_in_minutes: f64,
    pub permissions: AccessPermissions,
}

impl AccessPolicy {
    pub fn duration(&self) -> Duration {
        Duration::seconds((self.duration_in_minutes * 60.0).round() as i64)
    }
}

/// Locator kinds understood by the service, sent as their numeric code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocatorKind {
    /// Shared-access-signature URL into the asset's storage container
    Sas,
    /// Streaming origin URL used for playback
    OnDemandOrigin,
}

impl LocatorKind {
    pub fn code(self) -> u8 {
        match self {
            LocatorKind::Sas => 1,
            LocatorKind::OnDemandOrigin => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(LocatorKind::Sas),
            2 => Some(LocatorKind::OnDemandOrigin),
            _ => None,
        }
    }
}

impl Serialize for LocatorKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for LocatorKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let code = u8::deserialize(deserializer)?;
        Self::from_code(code)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown locator type {code}")))
    }
}

/// A time-bounded, policy-scoped URI into an asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Locator {
    pub id: String,

    #[serde(rename = "Type")]
    pub kind: LocatorKind,

    pub asset_id: String,

    pub access_policy_id: String,

    /// Base URI; for SAS locators the query string carries the signature
    pub path: Url,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    pub expiration_date_time: DateTime<Utc>,
}

impl Locator {
    /// URL of a single file below the locator's base path, keeping the query.
    pub fn file_url(&self, file_name: &str) -> Result<Url> {
        let mut url = self.path.clone();
        url.path_segments_mut()
            .map_err(|_| CommonError::InvalidUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .push(file_name);
        Ok(url)
    }

    pub fn is_active_at(&self, at: DateTime<Utc>) -> bool {
        let started = self.start_time.map_or(true, |start| start <= at);
        started && at < self.expiration_date_time
    }
}
