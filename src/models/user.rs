use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Identity, MeasureType};

/// A user's profile record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Identity,
    pub email: String,
    pub name: String,
    pub pref_measure: MeasureType,
    /// Object key of the profile picture, if one was uploaded.
    pub profile_pic: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Builds a new profile for `email` using the given defaults.
    pub fn new(email: impl Into<String>, defaults: &ProfileDefaults) -> Self {
        let email = email.into();
        Self {
            id: Identity::new(),
            name: defaults.name.clone().unwrap_or_else(|| email.clone()),
            email,
            pref_measure: defaults.pref_measure,
            profile_pic: None,
            created_at: Utc::now(),
        }
    }
}

/// Defaults applied when an identity is created on first login.
#[derive(Debug, Clone, Default)]
pub struct ProfileDefaults {
    /// Display name; the email address is used when unset.
    pub name: Option<String>,
    pub pref_measure: MeasureType,
}

/// Partial update of a profile. `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pref_measure: Option<MeasureType>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.email.is_none() && self.name.is_none() && self.pref_measure.is_none()
    }
}

impl From<&User> for ProfileUpdate {
    /// Full replacement of the mutable profile fields.
    fn from(user: &User) -> Self {
        Self {
            email: Some(user.email.clone()),
            name: Some(user.name.clone()),
            pref_measure: Some(user.pref_measure),
        }
    }
}
