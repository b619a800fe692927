//! Core domain types for the contact identity graph.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

// ---------------------------------------------------------------------------
// ContactId
// ---------------------------------------------------------------------------

/// Store-assigned, monotonically increasing contact identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContactId(pub i64);

impl std::fmt::Display for ContactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ContactId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

// ---------------------------------------------------------------------------
// Link precedence
// ---------------------------------------------------------------------------

/// Whether a contact is the canonical record of its cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkPrecedence {
    Primary,
    Secondary,
}

impl LinkPrecedence {
    /// The value stored in the `linkPrecedence` column.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }
}

impl std::fmt::Display for LinkPrecedence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LinkPrecedence {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "primary" => Ok(Self::Primary),
            "secondary" => Ok(Self::Secondary),
            other => Err(format!("unknown link precedence '{other}'")),
        }
    }
}

/// Write-side view of `(linkPrecedence, linkedId)`.
///
/// A secondary always carries its primary's id and a primary never carries one,
/// so writes cannot produce a half-linked row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactLink {
    Primary,
    Secondary(ContactId),
}

impl ContactLink {
    pub fn precedence(self) -> LinkPrecedence {
        match self {
            Self::Primary => LinkPrecedence::Primary,
            Self::Secondary(_) => LinkPrecedence::Secondary,
        }
    }

    pub fn linked_id(self) -> Option<ContactId> {
        match self {
            Self::Primary => None,
            Self::Secondary(id) => Some(id),
        }
    }
}

// ---------------------------------------------------------------------------
// Contact
// ---------------------------------------------------------------------------

/// A persisted contact row. Field names match the `contacts` table columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: ContactId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// The primary this contact belongs to; set only for secondaries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_id: Option<ContactId>,
    pub link_precedence: LinkPrecedence,
    /// Immutable; earliest wins primary selection.
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Contact {
    pub fn is_primary(&self) -> bool {
        self.link_precedence == LinkPrecedence::Primary
    }

    /// Apply a link change to this in-memory copy, mirroring a store update.
    pub fn relink(&mut self, link: ContactLink, at: DateTime<Utc>) {
        self.link_precedence = link.precedence();
        self.linked_id = link.linked_id();
        self.updated_at = at;
    }
}

/// Fields supplied when inserting a contact. Timestamps and id are assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewContact {
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub link: ContactLink,
}

// ---------------------------------------------------------------------------
// Identify request / response
// ---------------------------------------------------------------------------

/// One inbound observation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Accepts `phone` as an alias, and a JSON number as well as a string.
    #[serde(
        default,
        alias = "phone",
        deserialize_with = "deserialize_phone",
        skip_serializing_if = "Option::is_none"
    )]
    pub phone_number: Option<String>,
}

impl IdentifyRequest {
    pub fn new(email: Option<&str>, phone_number: Option<&str>) -> Self {
        Self {
            email: email.map(str::to_owned),
            phone_number: phone_number.map(str::to_owned),
        }
    }

    /// The email, with an empty string treated as absent.
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref().filter(|e| !e.is_empty())
    }

    /// The phone number, with an empty string treated as absent.
    pub fn phone_number(&self) -> Option<&str> {
        self.phone_number.as_deref().filter(|p| !p.is_empty())
    }
}

fn deserialize_phone<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Phone {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(
        Option::<Phone>::deserialize(deserializer)?.map(|phone| match phone {
            Phone::Text(s) => s,
            Phone::Number(n) => n.to_string(),
        }),
    )
}

/// The consolidated view of one identity cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidatedContact {
    pub primary_contact_id: ContactId,
    /// Primary's email first, then by owner creation order.
    pub emails: Vec<String>,
    /// Primary's phone first, then by owner creation order.
    pub phone_numbers: Vec<String>,
    pub secondary_contact_ids: Vec<ContactId>,
}

/// Outbound envelope: `{"contact": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyResponse {
    pub contact: ConsolidatedContact,
}
