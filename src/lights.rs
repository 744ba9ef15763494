//! Sets of addressable lights.
//!
//! A [`LightSet`] is either `All` (every light the installation knows
//! about), or an explicit finite set of positive light ids. The empty
//! explicit set plays the role of "no lights". Instances are cheap to
//! clone and are treated as immutable values throughout the crate;
//! [`Builder`] exists for accumulating unions without intermediate
//! allocations.

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Errors produced by light-set parsing and algebra.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LightSetError {
    /// The textual form could not be parsed.
    Malformed(String),

    /// A light id was zero or negative. Light ids are positive.
    NonPositiveId(i64),

    /// Subtraction with `All` as the receiver. "All lights except
    /// these" has no finite representation in this model.
    SubtractFromAll,

    /// Subtraction with `All` as the operand.
    SubtractAll,
}

impl fmt::Display for LightSetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(text) => write!(f, "Malformed light set: {:?}", text),
            Self::NonPositiveId(id) => write!(f, "Only positive light ids allowed, got {}", id),
            Self::SubtractFromAll => write!(f, "Cannot subtract from all lights"),
            Self::SubtractAll => write!(f, "Cannot subtract all lights"),
        }
    }
}

impl std::error::Error for LightSetError {}

/// A set of positive light ids, with `All` as a distinguished value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LightSet {
    /// Every light. Absorbing for union, identity for intersection.
    All,
    /// An explicit set of light ids; empty means no lights.
    Explicit(BTreeSet<u32>),
}

impl LightSet {
    /// Builds an explicit set from the given ids.
    ///
    /// Panics if any id is zero; light ids are positive.
    pub fn new<I: IntoIterator<Item = u32>>(ids: I) -> Self {
        let set: BTreeSet<u32> = ids.into_iter().collect();
        assert!(!set.contains(&0), "light ids are positive");
        Self::Explicit(set)
    }

    /// The empty set.
    pub fn none() -> Self {
        Self::Explicit(BTreeSet::new())
    }

    /// True only for the `All` value.
    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }

    /// True for an explicit set with no members. `All` is never none.
    pub fn is_none(&self) -> bool {
        match self {
            Self::All => false,
            Self::Explicit(ids) => ids.is_empty(),
        }
    }

    /// The union of this set and `other`.
    pub fn union(&self, other: &LightSet) -> LightSet {
        match (self, other) {
            (Self::All, _) | (_, Self::All) => Self::All,
            (Self::Explicit(a), Self::Explicit(b)) => {
                Self::Explicit(a.union(b).copied().collect())
            }
        }
    }

    /// The intersection of this set and `other`.
    pub fn intersect(&self, other: &LightSet) -> LightSet {
        match (self, other) {
            (Self::All, _) => other.clone(),
            (_, Self::All) => self.clone(),
            (Self::Explicit(a), Self::Explicit(b)) => {
                Self::Explicit(a.intersection(b).copied().collect())
            }
        }
    }

    /// The ids in this set that are not in `other`.
    ///
    /// Fails when either side is `All`: the result would have no
    /// finite representation (receiver) or the caller is asking for
    /// the empty set in a roundabout way that usually signals a bug
    /// (operand).
    pub fn subtract(&self, other: &LightSet) -> Result<LightSet, LightSetError> {
        match (self, other) {
            (Self::All, _) => Err(LightSetError::SubtractFromAll),
            (_, Self::All) => Err(LightSetError::SubtractAll),
            (Self::Explicit(a), Self::Explicit(b)) => {
                Ok(Self::Explicit(a.difference(b).copied().collect()))
            }
        }
    }

    /// True if this set and `other` share at least one light.
    /// `All` overlaps anything non-empty; the empty set overlaps
    /// nothing, including itself and `All`.
    pub fn overlaps(&self, other: &LightSet) -> bool {
        match (self, other) {
            (Self::All, _) => !other.is_none(),
            (_, Self::All) => !self.is_none(),
            (Self::Explicit(a), Self::Explicit(b)) => {
                let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
                small.iter().any(|id| large.contains(id))
            }
        }
    }

    /// The member ids in ascending order, paired with an is-all flag.
    ///
    /// `All` yields an empty sequence and `true`; the empty set
    /// yields an empty sequence and `false`. Callers must consult the
    /// flag before concluding that an empty sequence means no lights.
    pub fn to_ordered_ids(&self) -> (Vec<u32>, bool) {
        match self {
            Self::All => (Vec::new(), true),
            Self::Explicit(ids) => (ids.iter().copied().collect(), false),
        }
    }
}

impl fmt::Display for LightSet {
    /// `"All"`, `"None"`, or the ids comma-joined in ascending order.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("All"),
            Self::Explicit(ids) if ids.is_empty() => f.write_str("None"),
            Self::Explicit(ids) => {
                let mut first = true;
                for id in ids {
                    if !first {
                        f.write_str(",")?;
                    }
                    write!(f, "{}", id)?;
                    first = false;
                }
                Ok(())
            }
        }
    }
}

impl FromStr for LightSet {
    type Err = LightSetError;

    /// The exact inverse of [`fmt::Display`]: `"All"`, `"None"`, or
    /// comma separated positive ids (whitespace tolerated, duplicates
    /// collapsed).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "All" {
            return Ok(Self::All);
        }
        if s == "None" {
            return Ok(Self::none());
        }
        if s.is_empty() {
            return Err(LightSetError::Malformed(s.to_string()));
        }
        let mut ids = BTreeSet::new();
        for part in s.split(',') {
            let part = part.trim();
            let id: i64 = part
                .parse()
                .map_err(|_| LightSetError::Malformed(part.to_string()))?;
            if id <= 0 {
                return Err(LightSetError::NonPositiveId(id));
            }
            ids.insert(id as u32);
        }
        Ok(Self::Explicit(ids))
    }
}

impl Serialize for LightSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for LightSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(DeError::custom)
    }
}

/// Accumulates a union of light sets. The zero value is the empty
/// set, ready for use.
#[derive(Debug, Clone, Default)]
pub struct Builder {
    set: Option<LightSet>,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A builder whose initial contents are a copy of `set`.
    pub fn from_set(set: &LightSet) -> Self {
        Self {
            set: Some(set.clone()),
        }
    }

    /// Resets this builder to the empty set.
    pub fn clear(&mut self) -> &mut Self {
        self.set = Some(LightSet::none());
        self
    }

    /// Adds a single light.
    pub fn add_one(&mut self, id: u32) -> &mut Self {
        self.add(&LightSet::new([id]))
    }

    /// Adds the lights in `other`. Once `All` has been added the
    /// builder stays `All` and further additions have no effect.
    pub fn add(&mut self, other: &LightSet) -> &mut Self {
        let current = self.set.take().unwrap_or_else(LightSet::none);
        self.set = Some(current.union(other));
        self
    }

    /// The accumulated set. The builder remains usable afterwards.
    pub fn build(&self) -> LightSet {
        self.set.clone().unwrap_or_else(LightSet::none)
    }
}

/// Maps virtual light ids to physical light ids.
///
/// When a fixture is replaced its successor gets a new physical id;
/// the virtual id stays stable in configuration and programs. An id
/// with no mapping converts to itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LightMap(std::collections::BTreeMap<u32, u32>);

impl LightMap {
    pub fn new(mappings: std::collections::BTreeMap<u32, u32>) -> Self {
        Self(mappings)
    }

    /// Converts a virtual light id to its physical id.
    pub fn convert(&self, virtual_id: u32) -> u32 {
        self.0.get(&virtual_id).copied().unwrap_or(virtual_id)
    }
}
