//! Enum types for the braid engine.
//!
//! Each enum has:
//! - Custom Serialize (as its wire string)
//! - Custom Deserialize (known variants + catch-all Custom(String))
//! - `as_str()`, `is_default()`, `Display` impl

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

// ---------------------------------------------------------------------------
// Macro: defines an enum with known string variants + a Custom(String) fallback.
// ---------------------------------------------------------------------------
macro_rules! define_enum {
    (
        $(#[$meta:meta])*
        $name:ident, default = $default:ident, custom_variant = $custom_variant:ident,
        variants: [
            $( ($variant:ident, $str:expr) ),+ $(,)?
        ]
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub enum $name {
            $( $variant, )+
            $custom_variant(String),
        }

        impl $name {
            /// Returns the string representation.
            pub fn as_str(&self) -> &str {
                match self {
                    $( Self::$variant => $str, )+
                    Self::$custom_variant(s) => s.as_str(),
                }
            }

            /// Returns `true` if this is the default variant.
            pub fn is_default(&self) -> bool {
                *self == Self::$default
            }

            /// Returns `true` if this is a built-in (non-custom) variant.
            pub fn is_builtin(&self) -> bool {
                !matches!(self, Self::$custom_variant(_))
            }

            /// Returns `true` if this is a known valid variant or any non-empty custom string.
            pub fn is_valid(&self) -> bool {
                match self {
                    Self::$custom_variant(s) => !s.is_empty(),
                    _ => true,
                }
            }

            /// Returns `true` if this is valid, also accepting the given custom values.
            pub fn is_valid_with_custom(&self, custom_values: &[&str]) -> bool {
                if self.is_builtin() {
                    return true;
                }
                if let Self::$custom_variant(s) = self {
                    return custom_values.contains(&s.as_str());
                }
                false
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::$default
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Ok(Self::from(s.as_str()))
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                match s {
                    $( $str => Self::$variant, )+
                    other => Self::$custom_variant(other.to_owned()),
                }
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                // Check known variants first to avoid allocation in common case.
                match s.as_str() {
                    $( $str => Self::$variant, )+
                    _ => Self::$custom_variant(s),
                }
            }
        }
    };
}

// ===========================================================================
// Status
// ===========================================================================

define_enum! {
    /// Current state of an issue.
    ///
    /// `Tombstone` marks a deleted issue that is retained so deletion
    /// propagates through sync. It cannot be set via the update path;
    /// delete is the only transition into it.
    Status, default = Open, custom_variant = Custom,
    variants: [
        (Open, "open"),
        (InProgress, "in_progress"),
        (Blocked, "blocked"),
        (Closed, "closed"),
        (Tombstone, "tombstone"),
    ]
}

impl Status {
    /// Returns `true` for statuses that count as active work (can be blocked,
    /// can appear in ready work).
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Closed | Self::Tombstone)
    }
}

// ===========================================================================
// IssueType
// ===========================================================================

define_enum! {
    /// Categorises the kind of work.
    ///
    /// Non-built-in types arriving from foreign repos are trusted on import.
    IssueType, default = Task, custom_variant = Custom,
    variants: [
        (Bug, "bug"),
        (Feature, "feature"),
        (Task, "task"),
        (Epic, "epic"),
        (Chore, "chore"),
        (Message, "message"),
        (Agent, "agent"),
        (Role, "role"),
    ]
}

// ===========================================================================
// DependencyType
// ===========================================================================

define_enum! {
    /// Relationship type between issues.
    DependencyType, default = Blocks, custom_variant = Custom,
    variants: [
        (Blocks, "blocks"),
        (ParentChild, "parent-child"),
        (Related, "related"),
        (RelatesTo, "relates-to"),
        (DiscoveredFrom, "discovered-from"),
        (ConditionalBlocks, "conditional-blocks"),
        (WaitsFor, "waits-for"),
        (Tracks, "tracks"),
    ]
}

impl DependencyType {
    /// Returns `true` if an edge of this type can make the source issue
    /// blocked (directly or via a gate).
    ///
    /// `parent-child` is not itself blocking; it propagates blockedness from
    /// parent to child and is handled by the cache's transitive pass.
    pub fn blocks_work(&self) -> bool {
        matches!(
            self,
            Self::Blocks | Self::ConditionalBlocks | Self::WaitsFor | Self::Tracks
        )
    }

    /// Returns `true` if this type participates in cycle prevention.
    ///
    /// `relates-to` is deliberately excluded so bidirectional relates-to
    /// edges are legal.
    pub fn in_cycle_set(&self) -> bool {
        matches!(
            self,
            Self::Blocks | Self::ParentChild | Self::DiscoveredFrom | Self::Related
        )
    }

    /// Returns `true` for gate types whose blocking decision depends on more
    /// than the target's open/closed state.
    pub fn is_gate(&self) -> bool {
        matches!(self, Self::ConditionalBlocks | Self::WaitsFor | Self::Tracks)
    }
}

// ===========================================================================
// SortPolicy
// ===========================================================================

define_enum! {
    /// Determines how ready work is ordered.
    SortPolicy, default = Hybrid, custom_variant = Custom,
    variants: [
        (Hybrid, "hybrid"),
        (Priority, "priority"),
        (Oldest, "oldest"),
    ]
}

// ===========================================================================
// EventType
// ===========================================================================

/// Categorises audit trail events.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    Created,
    Updated,
    StatusChanged,
    Commented,
    Closed,
    Reopened,
    Deleted,
    DependencyAdded,
    DependencyRemoved,
    LabelAdded,
    LabelRemoved,
    Compacted,
    /// Catch-all for unknown / future event types.
    Other(String),
}

impl EventType {
    /// Returns the string representation.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::StatusChanged => "status_changed",
            Self::Commented => "commented",
            Self::Closed => "closed",
            Self::Reopened => "reopened",
            Self::Deleted => "deleted",
            Self::DependencyAdded => "dependency_added",
            Self::DependencyRemoved => "dependency_removed",
            Self::LabelAdded => "label_added",
            Self::LabelRemoved => "label_removed",
            Self::Compacted => "compacted",
            Self::Other(s) => s.as_str(),
        }
    }
}

impl Default for EventType {
    fn default() -> Self {
        Self::Created
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from(s.as_str()))
    }
}

impl From<&str> for EventType {
    fn from(s: &str) -> Self {
        match s {
            "created" => Self::Created,
            "updated" => Self::Updated,
            "status_changed" => Self::StatusChanged,
            "commented" => Self::Commented,
            "closed" => Self::Closed,
            "reopened" => Self::Reopened,
            "deleted" => Self::Deleted,
            "dependency_added" => Self::DependencyAdded,
            "dependency_removed" => Self::DependencyRemoved,
            "label_added" => Self::LabelAdded,
            "label_removed" => Self::LabelRemoved,
            "compacted" => Self::Compacted,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl From<String> for EventType {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_default_is_open() {
        assert_eq!(Status::default(), Status::Open);
        assert!(Status::Open.is_default());
        assert!(!Status::Closed.is_default());
    }

    #[test]
    fn status_roundtrip_serde() {
        let s = Status::InProgress;
        let json = serde_json::to_string(&s).unwrap();
        assert_eq!(json, r#""in_progress""#);
        let back: Status = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }

    #[test]
    fn status_custom_roundtrip() {
        let json = r#""triage""#;
        let s: Status = serde_json::from_str(json).unwrap();
        assert_eq!(s, Status::Custom("triage".into()));
        assert_eq!(serde_json::to_string(&s).unwrap(), json);
    }

    #[test]
    fn status_active() {
        assert!(Status::Open.is_active());
        assert!(Status::InProgress.is_active());
        assert!(Status::Blocked.is_active());
        assert!(!Status::Closed.is_active());
        assert!(!Status::Tombstone.is_active());
        assert!(Status::Custom("triage".into()).is_active());
    }

    #[test]
    fn dependency_type_as_str() {
        assert_eq!(DependencyType::ParentChild.as_str(), "parent-child");
        assert_eq!(
            DependencyType::ConditionalBlocks.as_str(),
            "conditional-blocks"
        );
    }

    #[test]
    fn dependency_type_blocks_work() {
        assert!(DependencyType::Blocks.blocks_work());
        assert!(DependencyType::ConditionalBlocks.blocks_work());
        assert!(DependencyType::WaitsFor.blocks_work());
        assert!(DependencyType::Tracks.blocks_work());
        assert!(!DependencyType::ParentChild.blocks_work());
        assert!(!DependencyType::Related.blocks_work());
        assert!(!DependencyType::RelatesTo.blocks_work());
    }

    #[test]
    fn dependency_type_cycle_set_excludes_relates_to() {
        assert!(DependencyType::Blocks.in_cycle_set());
        assert!(DependencyType::ParentChild.in_cycle_set());
        assert!(DependencyType::DiscoveredFrom.in_cycle_set());
        assert!(DependencyType::Related.in_cycle_set());
        assert!(!DependencyType::RelatesTo.in_cycle_set());
        assert!(!DependencyType::ConditionalBlocks.in_cycle_set());
    }

    #[test]
    fn event_type_other_variant() {
        let json = r#""custom_event""#;
        let e: EventType = serde_json::from_str(json).unwrap();
        assert_eq!(e, EventType::Other("custom_event".into()));
    }

    #[test]
    fn sort_policy_default() {
        assert_eq!(SortPolicy::default(), SortPolicy::Hybrid);
    }
}
