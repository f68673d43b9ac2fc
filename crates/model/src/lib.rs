//! # Feed Model
//!
//! Shared value types for the channel feed pipeline: item identities, raw
//! item variants, fetch pages, and the overlay value/event types. Every other
//! crate in the workspace builds on these.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use serde::{Deserialize, Serialize};

pub type ChannelId = i64;
pub type ItemSeq = i64;
pub type EpochMillis = u64;

/// Wall-clock milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> EpochMillis {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|dur| u64::try_from(dur.as_millis()).ok())
        .unwrap_or(0)
}

/// Composite item identity, totally ordered by channel first, then by the
/// item's sequence number within the channel. The derived `Ord` relies on
/// field order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemId {
    pub channel_id: ChannelId,
    pub item_id: ItemSeq,
}

impl ItemId {
    #[must_use]
    pub const fn new(channel_id: ChannelId, item_id: ItemSeq) -> Self {
        Self {
            channel_id,
            item_id,
        }
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.channel_id, self.item_id)
    }
}

/// A live, non-deleted feed item as the raw store holds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalItem {
    pub id: ItemId,
    pub updated_at: EpochMillis,
    pub text: String,
}

impl NormalItem {
    /// New item with the default text shape `"{item_id}!"`.
    #[must_use]
    pub fn new(id: ItemId, updated_at: EpochMillis) -> Self {
        Self {
            id,
            updated_at,
            text: format!("{}!", id.item_id),
        }
    }

    #[must_use]
    pub fn with_text(id: ItemId, updated_at: EpochMillis, text: impl Into<String>) -> Self {
        Self {
            id,
            updated_at,
            text: text.into(),
        }
    }
}

/// Raw item mutation as carried by fetch results and the live push stream.
///
/// Identity is the id; equality also compares payload fields, which is what
/// the derived-item cache keys invalidation on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RawItem {
    Normal(NormalItem),
    Deleted { id: ItemId, updated_at: EpochMillis },
}

impl RawItem {
    #[must_use]
    pub const fn id(&self) -> ItemId {
        match self {
            RawItem::Normal(item) => item.id,
            RawItem::Deleted { id, .. } => *id,
        }
    }

    #[must_use]
    pub const fn updated_at(&self) -> EpochMillis {
        match self {
            RawItem::Normal(item) => item.updated_at,
            RawItem::Deleted { updated_at, .. } => *updated_at,
        }
    }

    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        matches!(self, RawItem::Deleted { .. })
    }
}

/// Result of a windowed fetch: the items inside the window plus the sequence
/// number of the last item in the channel-filtered superset, used as the
/// forward pagination cursor.
///
/// `items` may be empty (pivot not found); `last_id` always refers to an
/// existing item; the empty-channel case is an error, never a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub items: Vec<NormalItem>,
    pub last_id: ItemSeq,
}

/// Window position relative to the pivot index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchType {
    Older,
    Around,
    Newer,
}

/// Per-item reaction, domain 0–9.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReactionValue(u8);

impl ReactionValue {
    pub const MAX: u8 = 9;

    /// `None` when `value` is outside the 0–9 domain.
    #[must_use]
    pub const fn new(value: u8) -> Option<Self> {
        if value <= Self::MAX {
            Some(Self(value))
        } else {
            None
        }
    }

    #[must_use]
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self(rng.gen_range(0..=Self::MAX))
    }

    #[must_use]
    pub const fn value(self) -> u8 {
        self.0
    }
}

impl fmt::Display for ReactionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Reaction({})", self.0)
    }
}

/// Live reaction mutation. `Insert` and `Update` both resolve to a put on
/// the overlay map; `Delete` removes the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReactionEvent {
    Insert {
        target: ItemId,
        value: ReactionValue,
    },
    Update {
        target: ItemId,
        value: ReactionValue,
    },
    Delete {
        target: ItemId,
    },
}

impl ReactionEvent {
    #[must_use]
    pub const fn target(&self) -> ItemId {
        match self {
            ReactionEvent::Insert { target, .. }
            | ReactionEvent::Update { target, .. }
            | ReactionEvent::Delete { target } => *target,
        }
    }

    /// Uniformly random event shape for the given target.
    #[must_use]
    pub fn random<R: Rng + ?Sized>(target: ItemId, rng: &mut R) -> Self {
        match rng.gen_range(0..3) {
            0 => ReactionEvent::Insert {
                target,
                value: ReactionValue::random(rng),
            },
            1 => ReactionEvent::Update {
                target,
                value: ReactionValue::random(rng),
            },
            _ => ReactionEvent::Delete { target },
        }
    }
}

/// Opaque per-item scrap payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapValue(String);

impl ScrapValue {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Session identity: several independent sessions may view the same channel
/// as long as their disambiguators differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub channel_id: ChannelId,
    pub disambiguator: i64,
}

impl SessionKey {
    #[must_use]
    pub const fn new(channel_id: ChannelId, disambiguator: i64) -> Self {
        Self {
            channel_id,
            disambiguator,
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.channel_id, self.disambiguator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn item_ids_order_by_channel_then_sequence() {
        let mut ids = vec![
            ItemId::new(1, 5),
            ItemId::new(0, 9),
            ItemId::new(1, 2),
            ItemId::new(0, 0),
        ];
        ids.sort();
        assert_eq!(
            ids,
            vec![
                ItemId::new(0, 0),
                ItemId::new(0, 9),
                ItemId::new(1, 2),
                ItemId::new(1, 5),
            ]
        );
    }

    #[test]
    fn raw_item_equality_includes_payload() {
        let id = ItemId::new(0, 1);
        let a = RawItem::Normal(NormalItem::with_text(id, 10, "a"));
        let b = RawItem::Normal(NormalItem::with_text(id, 10, "b"));
        let deleted = RawItem::Deleted { id, updated_at: 10 };

        assert_eq!(a.id(), b.id());
        assert_ne!(a, b);
        assert_ne!(a, deleted);
        assert!(deleted.is_deleted());
    }

    #[test]
    fn reaction_value_domain_is_bounded() {
        assert!(ReactionValue::new(9).is_some());
        assert!(ReactionValue::new(10).is_none());

        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            assert!(ReactionValue::random(&mut rng).value() <= ReactionValue::MAX);
        }
    }

    #[test]
    fn random_reaction_events_keep_their_target() {
        let target = ItemId::new(2, 42);
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..20 {
            assert_eq!(ReactionEvent::random(target, &mut rng).target(), target);
        }
    }

    #[test]
    fn item_id_serializes_round_trip() {
        let id = ItemId::new(3, 17);
        let json = serde_json::to_string(&id).expect("serialize");
        let back: ItemId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(id, back);
    }
}
