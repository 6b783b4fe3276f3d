use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, CoreResult};

// ---------------------------------------------------------------------------
// Timestamp: canonical UTC instant, RFC 3339 on the wire
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now())
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    pub fn from_millis(millis: i64) -> CoreResult<Self> {
        DateTime::from_timestamp_millis(millis)
            .map(Self)
            .ok_or_else(|| CoreError::InvalidTimestamp(format!("{} ms out of range", millis)))
    }

    pub fn parse_rfc3339(s: &str) -> CoreResult<Self> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| Self(dt.with_timezone(&Utc)))
            .map_err(|e| CoreError::InvalidTimestamp(format!("'{}': {}", s, e)))
    }

    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    pub fn as_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }

    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// Shift by a signed duration, saturating at the representable range.
    pub fn offset(&self, delta: Duration) -> Self {
        let shifted = self.0.checked_add_signed(delta).unwrap_or(if delta < Duration::zero() {
            DateTime::<Utc>::MIN_UTC
        } else {
            DateTime::<Utc>::MAX_UTC
        });
        Self(shifted)
    }

    /// Shift by a delta that may not fit a `Duration`; `None` saturates in
    /// the direction of `sign`.
    fn offset_checked(&self, delta: Option<Duration>, sign: i64) -> Self {
        match delta {
            Some(delta) => self.offset(delta),
            None if sign < 0 => Self(DateTime::<Utc>::MIN_UTC),
            None => Self(DateTime::<Utc>::MAX_UTC),
        }
    }

    pub fn plus_days(&self, days: i64) -> Self {
        self.offset_checked(Duration::try_days(days), days)
    }

    pub fn minus_days(&self, days: i64) -> Self {
        let delta = Duration::try_days(days).map(|d| -d);
        self.offset_checked(delta, days.saturating_neg())
    }

    pub fn plus_hours(&self, hours: i64) -> Self {
        self.offset_checked(Duration::try_hours(hours), hours)
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_rfc3339())
    }
}

// ---------------------------------------------------------------------------
// Typed identifiers
// ---------------------------------------------------------------------------

macro_rules! define_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

define_id!(ClientId, "Tenant (client household) that owns a record.");
define_id!(ConsentId, "Identifier of a consent grant.");
define_id!(RequestId, "Identifier of an access request.");
define_id!(RevocationId, "Identifier of a revocation event.");
define_id!(PolicyId, "Identifier of a sharing policy.");
define_id!(SubjectId, "Identifier of the user, advisor or client acting on a scope.");
define_id!(ScopeId, "Identifier of a node in the household/entity/account/document tree.");
define_id!(UserId, "Identifier of a back-office user who grants, decides or revokes.");
define_id!(TargetId, "Identifier of the document or report being accessed.");

// ---------------------------------------------------------------------------
// Wire enums: lowercase on the wire, parseable from strings
// ---------------------------------------------------------------------------

macro_rules! wire_enum {
    ($name:ident, $kind:expr, { $($variant:ident => $wire:expr),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $wire),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($wire => Ok($name::$variant),)+
                    other => Err(CoreError::UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

/// Who a consent is granted to, or who is asking for access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectType {
    User,
    Advisor,
    Client,
}

wire_enum!(SubjectType, "subject type", {
    User => "user",
    Advisor => "advisor",
    Client => "client",
});

/// Node of the ownership tree a consent or rule targets, broadest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeType {
    Household,
    Entity,
    Account,
    Document,
    Report,
}

wire_enum!(ScopeType, "scope type", {
    Household => "household",
    Entity => "entity",
    Account => "account",
    Document => "document",
    Report => "report",
});

/// Closed set of actions a subject can attempt on a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    View,
    Download,
    Export,
    Api,
}

wire_enum!(Action, "action", {
    View => "view",
    Download => "download",
    Export => "export",
    Api => "api",
});

/// Kind of artifact being accessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    Document,
    Report,
}

wire_enum!(TargetType, "target type", {
    Document => "document",
    Report => "report",
});

impl TargetType {
    /// The scope type a direct grant on this target carries.
    pub fn scope_type(&self) -> ScopeType {
        match self {
            TargetType::Document => ScopeType::Document,
            TargetType::Report => ScopeType::Report,
        }
    }

    /// Plural form used by `SharingPolicy::applies_to`.
    pub fn plural(&self) -> &'static str {
        match self {
            TargetType::Document => "documents",
            TargetType::Report => "reports",
        }
    }
}

// ---------------------------------------------------------------------------
// Permission: open, forward-compatible set of granted capabilities
// ---------------------------------------------------------------------------

/// A permission string carried by consents and requests.
///
/// The four known values mirror [`Action`]; anything else is kept verbatim
/// so records written by newer versions survive a round trip.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(String);

impl Permission {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this permission authorizes `action`.
    pub fn covers(&self, action: Action) -> bool {
        self.0 == action.as_str()
    }

    /// The action this permission names, if it is one of the known four.
    pub fn action(&self) -> Option<Action> {
        self.0.parse().ok()
    }
}

impl From<Action> for Permission {
    fn from(action: Action) -> Self {
        Self(action.as_str().to_string())
    }
}

impl From<&str> for Permission {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
