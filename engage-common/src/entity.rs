//! Entity identity and engagement vocabulary
//!
//! Every cached engagement record is keyed by an [`EntityRef`]. The
//! [`Action`], [`Metric`] and [`Flag`] enums name the counters and toggles a
//! viewer can move, using the canonical `<name>` / `<name>_count` field names.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of content entity that carries engagement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Post,
    Comment,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Post => "post",
            EntityType::Comment => "comment",
        }
    }

    /// Collection segment used in transport URLs (`posts`, `comments`)
    pub fn path_segment(&self) -> &'static str {
        match self {
            EntityType::Post => "posts",
            EntityType::Comment => "comments",
        }
    }

    /// Only posts carry a `comment` counter
    pub fn has_comment_metric(&self) -> bool {
        matches!(self, EntityType::Post)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "post" | "posts" => Ok(EntityType::Post),
            "comment" | "comments" => Ok(EntityType::Comment),
            other => Err(Error::InvalidInput(format!("unknown entity type: {}", other))),
        }
    }
}

/// Stable identity key of a post or comment
///
/// Displays as `post:42`, and parses from the same form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: EntityType,
    pub entity_id: i64,
}

impl EntityRef {
    pub fn new(entity_type: EntityType, entity_id: i64) -> Self {
        Self {
            entity_type,
            entity_id,
        }
    }

    pub fn post(entity_id: i64) -> Self {
        Self::new(EntityType::Post, entity_id)
    }

    pub fn comment(entity_id: i64) -> Self {
        Self::new(EntityType::Comment, entity_id)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.entity_id)
    }
}

impl FromStr for EntityRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| Error::InvalidInput(format!("expected <type>:<id>, got {}", s)))?;
        let entity_id = id
            .trim()
            .parse::<i64>()
            .map_err(|e| Error::InvalidInput(format!("invalid entity id {}: {}", id, e)))?;
        Ok(Self::new(kind.parse()?, entity_id))
    }
}

/// Named engagement counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Like,
    Dislike,
    Save,
    Share,
    Report,
    Comment,
}

impl Metric {
    pub const ALL: [Metric; 6] = [
        Metric::Like,
        Metric::Dislike,
        Metric::Save,
        Metric::Share,
        Metric::Report,
        Metric::Comment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Like => "like",
            Metric::Dislike => "dislike",
            Metric::Save => "save",
            Metric::Share => "share",
            Metric::Report => "report",
            Metric::Comment => "comment",
        }
    }

    /// Payload key of this counter (`like_count`, ...)
    pub fn count_key(&self) -> &'static str {
        match self {
            Metric::Like => "like_count",
            Metric::Dislike => "dislike_count",
            Metric::Save => "save_count",
            Metric::Share => "share_count",
            Metric::Report => "report_count",
            Metric::Comment => "comment_count",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Viewer-specific interaction toggle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flag {
    Like,
    Dislike,
    Save,
    Report,
}

impl Flag {
    pub const ALL: [Flag; 4] = [Flag::Like, Flag::Dislike, Flag::Save, Flag::Report];

    /// Payload key of this flag
    pub fn as_str(&self) -> &'static str {
        match self {
            Flag::Like => "like",
            Flag::Dislike => "dislike",
            Flag::Save => "save",
            Flag::Report => "report",
        }
    }

    /// Counter that moves together with this flag
    pub fn metric(&self) -> Metric {
        match self {
            Flag::Like => Metric::Like,
            Flag::Dislike => Metric::Dislike,
            Flag::Save => Metric::Save,
            Flag::Report => Metric::Report,
        }
    }

    /// The mutually exclusive counterpart (like ↔ dislike)
    pub fn exclusive_with(&self) -> Option<Flag> {
        match self {
            Flag::Like => Some(Flag::Dislike),
            Flag::Dislike => Some(Flag::Like),
            Flag::Save | Flag::Report => None,
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engagement action a viewer can trigger on an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Like,
    Dislike,
    Save,
    Share,
    Report,
}

impl Action {
    pub const ALL: [Action; 5] = [
        Action::Like,
        Action::Dislike,
        Action::Save,
        Action::Share,
        Action::Report,
    ];

    /// Endpoint path segment
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Like => "like",
            Action::Dislike => "dislike",
            Action::Save => "save",
            Action::Share => "share",
            Action::Report => "report",
        }
    }

    /// Persisted toggle, `None` for count-only actions (share)
    pub fn flag(&self) -> Option<Flag> {
        match self {
            Action::Like => Some(Flag::Like),
            Action::Dislike => Some(Flag::Dislike),
            Action::Save => Some(Flag::Save),
            Action::Report => Some(Flag::Report),
            Action::Share => None,
        }
    }

    /// Counter moved by this action
    pub fn metric(&self) -> Metric {
        match self {
            Action::Like => Metric::Like,
            Action::Dislike => Metric::Dislike,
            Action::Save => Metric::Save,
            Action::Share => Metric::Share,
            Action::Report => Metric::Report,
        }
    }

    /// Flags an optimistic patch of this action may write
    pub fn owned_flags(&self) -> &'static [Flag] {
        match self {
            Action::Like | Action::Dislike => &[Flag::Like, Flag::Dislike],
            Action::Save => &[Flag::Save],
            Action::Report => &[Flag::Report],
            Action::Share => &[],
        }
    }

    /// Counters an optimistic patch of this action may write
    pub fn owned_metrics(&self) -> &'static [Metric] {
        match self {
            Action::Like | Action::Dislike => &[Metric::Like, Metric::Dislike],
            Action::Save => &[Metric::Save],
            Action::Report => &[Metric::Report],
            Action::Share => &[Metric::Share],
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Action::ALL
            .into_iter()
            .find(|a| a.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::InvalidInput(format!("unknown action: {}", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_ref_display_and_parse() {
        let r = EntityRef::post(42);
        assert_eq!(r.to_string(), "post:42");
        assert_eq!("post:42".parse::<EntityRef>().unwrap(), r);
        assert_eq!("comments:7".parse::<EntityRef>().unwrap(), EntityRef::comment(7));
    }

    #[test]
    fn test_entity_ref_parse_rejects_garbage() {
        assert!("post".parse::<EntityRef>().is_err());
        assert!("post:abc".parse::<EntityRef>().is_err());
        assert!("story:1".parse::<EntityRef>().is_err());
    }

    #[test]
    fn test_entity_ref_serde_shape() {
        let json = serde_json::to_value(EntityRef::comment(3)).unwrap();
        assert_eq!(json, serde_json::json!({"entity_type": "comment", "entity_id": 3}));
    }

    #[test]
    fn test_share_is_count_only() {
        assert_eq!(Action::Share.flag(), None);
        assert!(Action::Share.owned_flags().is_empty());
        assert_eq!(Action::Share.owned_metrics(), &[Metric::Share]);
    }

    #[test]
    fn test_like_and_dislike_own_both_reaction_fields() {
        for action in [Action::Like, Action::Dislike] {
            assert!(action.owned_flags().contains(&Flag::Like));
            assert!(action.owned_flags().contains(&Flag::Dislike));
            assert!(action.owned_metrics().contains(&Metric::Like));
            assert!(action.owned_metrics().contains(&Metric::Dislike));
        }
        assert_eq!(Flag::Like.exclusive_with(), Some(Flag::Dislike));
        assert_eq!(Flag::Save.exclusive_with(), None);
    }

    #[test]
    fn test_action_parse_case_insensitive() {
        assert_eq!("LIKE".parse::<Action>().unwrap(), Action::Like);
        assert_eq!(" report ".parse::<Action>().unwrap(), Action::Report);
        assert!("comment".parse::<Action>().is_err());
    }

    #[test]
    fn test_comment_metric_only_on_posts() {
        assert!(EntityType::Post.has_comment_metric());
        assert!(!EntityType::Comment.has_comment_metric());
        assert_eq!(Metric::Comment.count_key(), "comment_count");
    }
}
