//! Embedded verification predicates.
//!
//! A predicate is a closed tree of declarative conditions. It is data, never
//! code: the only way to run one is [`Predicate::evaluate`], which is pure and
//! reads nothing but the supplied [`PredicateInput`].

use ciborium::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::canonical::{self, as_i64, as_u64};
use crate::container::Section;
use crate::error::{CoreError, ParseError};
use crate::types::{Purpose, Timestamp};

/// Deepest predicate tree accepted by the codec. A leaf has depth 1.
pub const MAX_PREDICATE_DEPTH: usize = 8;

const MAX_COUNTER_LEN: usize = 64;

mod tags {
    pub const ALWAYS: u64 = 0;
    pub const QUANTITY_REMAINING: u64 = 1;
    pub const DATE_RANGE: u64 = 2;
    pub const GEOFENCE: u64 = 3;
    pub const PURPOSE_MATCH: u64 = 4;
    pub const ALL: u64 = 5;
    pub const ANY: u64 = 6;
}

/// A point in integer microdegrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat_e6: i64,
    pub lon_e6: i64,
}

impl GeoPoint {
    pub fn new(lat_e6: i64, lon_e6: i64) -> Self {
        Self { lat_e6, lon_e6 }
    }
}

/// An inclusive latitude/longitude box in integer microdegrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoBox {
    pub min_lat_e6: i64,
    pub max_lat_e6: i64,
    pub min_lon_e6: i64,
    pub max_lon_e6: i64,
}

impl GeoBox {
    pub fn contains(&self, point: &GeoPoint) -> bool {
        (self.min_lat_e6..=self.max_lat_e6).contains(&point.lat_e6)
            && (self.min_lon_e6..=self.max_lon_e6).contains(&point.lon_e6)
    }

    fn validate(&self) -> Result<(), CoreError> {
        const LAT: i64 = 90_000_000;
        const LON: i64 = 180_000_000;
        let in_range = [self.min_lat_e6, self.max_lat_e6]
            .iter()
            .all(|v| (-LAT..=LAT).contains(v))
            && [self.min_lon_e6, self.max_lon_e6]
                .iter()
                .all(|v| (-LON..=LON).contains(v));
        if !in_range || self.min_lat_e6 > self.max_lat_e6 || self.min_lon_e6 > self.max_lon_e6 {
            return Err(CoreError::InvalidPredicate(format!("invalid geofence {self:?}")));
        }
        Ok(())
    }
}

/// A verification predicate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Predicate {
    /// Always satisfied.
    #[default]
    Always,
    /// Satisfied while the named usage counter is above zero. When the
    /// verifier supplies no value for the counter, `initial` is used.
    QuantityRemaining { counter: String, initial: u64 },
    /// Satisfied when `not_before <= now <= not_after` (each bound optional).
    DateRange {
        not_before: Option<Timestamp>,
        not_after: Option<Timestamp>,
    },
    /// Satisfied when the supplied location lies inside the box.
    Geofence(GeoBox),
    /// Satisfied when the declared purpose is one of the listed ones.
    PurposeMatch(BTreeSet<Purpose>),
    All(Vec<Predicate>),
    Any(Vec<Predicate>),
}

/// Inputs a predicate may read.
#[derive(Debug, Clone, Copy)]
pub struct PredicateInput<'a> {
    pub now: Timestamp,
    pub quantities: &'a BTreeMap<String, u64>,
    pub location: Option<GeoPoint>,
    pub purpose: Option<&'a Purpose>,
}

/// Why a predicate was not satisfied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PredicateFailure {
    QuantityExhausted { counter: String },
    NotYetValid { not_before: Timestamp },
    NoLongerValid { not_after: Timestamp },
    OutsideGeofence,
    LocationRequired,
    PurposeMismatch,
    PurposeRequired,
    NoAlternative { failures: Vec<PredicateFailure> },
}

impl PredicateFailure {
    pub fn code(&self) -> &'static str {
        match self {
            PredicateFailure::QuantityExhausted { .. } => "quantity_exhausted",
            PredicateFailure::NotYetValid { .. } => "not_yet_valid",
            PredicateFailure::NoLongerValid { .. } => "no_longer_valid",
            PredicateFailure::OutsideGeofence => "outside_geofence",
            PredicateFailure::LocationRequired => "location_required",
            PredicateFailure::PurposeMismatch => "purpose_mismatch",
            PredicateFailure::PurposeRequired => "purpose_required",
            PredicateFailure::NoAlternative { .. } => "no_alternative",
        }
    }

    /// True when the failure comes from context the caller did not supply
    /// rather than from a condition that evaluated false.
    pub fn is_missing_input(&self) -> bool {
        match self {
            PredicateFailure::LocationRequired | PredicateFailure::PurposeRequired => true,
            PredicateFailure::NoAlternative { failures } => {
                !failures.is_empty() && failures.iter().all(|f| f.is_missing_input())
            }
            _ => false,
        }
    }
}

impl Predicate {
    pub fn quantity(counter: impl Into<String>, initial: u64) -> Self {
        Predicate::QuantityRemaining {
            counter: counter.into(),
            initial,
        }
    }

    pub fn purposes<I: IntoIterator<Item = Purpose>>(purposes: I) -> Self {
        Predicate::PurposeMatch(purposes.into_iter().collect())
    }

    /// Nesting depth; a leaf has depth 1.
    pub fn depth(&self) -> usize {
        match self {
            Predicate::All(children) | Predicate::Any(children) => {
                1 + children.iter().map(Predicate::depth).max().unwrap_or(0)
            }
            _ => 1,
        }
    }

    /// Structural checks applied at build time and after decoding.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.depth() > MAX_PREDICATE_DEPTH {
            return Err(CoreError::InvalidPredicate(format!(
                "nesting exceeds depth {MAX_PREDICATE_DEPTH}"
            )));
        }
        self.validate_node()
    }

    fn validate_node(&self) -> Result<(), CoreError> {
        match self {
            Predicate::Always => Ok(()),
            Predicate::QuantityRemaining { counter, .. } => {
                if counter.is_empty() || counter.len() > MAX_COUNTER_LEN {
                    return Err(CoreError::InvalidPredicate(format!(
                        "invalid counter name {counter:?}"
                    )));
                }
                Ok(())
            }
            Predicate::DateRange {
                not_before: Some(nb),
                not_after: Some(na),
            } if nb > na => Err(CoreError::InvalidPredicate(
                "date range ends before it starts".into(),
            )),
            Predicate::DateRange { .. } => Ok(()),
            Predicate::Geofence(area) => area.validate(),
            Predicate::PurposeMatch(purposes) if purposes.is_empty() => Err(
                CoreError::InvalidPredicate("purpose match lists no purposes".into()),
            ),
            Predicate::PurposeMatch(_) => Ok(()),
            Predicate::All(children) | Predicate::Any(children) => {
                if children.is_empty() {
                    return Err(CoreError::InvalidPredicate("empty combinator".into()));
                }
                children.iter().try_for_each(Predicate::validate_node)
            }
        }
    }

    /// Usage counters referenced anywhere in the tree, with their initial values.
    pub fn counters(&self) -> BTreeMap<String, u64> {
        let mut out = BTreeMap::new();
        self.collect_counters(&mut out);
        out
    }

    fn collect_counters(&self, out: &mut BTreeMap<String, u64>) {
        match self {
            Predicate::QuantityRemaining { counter, initial } => {
                out.entry(counter.clone()).or_insert(*initial);
            }
            Predicate::All(children) | Predicate::Any(children) => {
                for child in children {
                    child.collect_counters(out);
                }
            }
            _ => {}
        }
    }

    /// Evaluate against the given input.
    pub fn evaluate(&self, input: &PredicateInput<'_>) -> Result<(), PredicateFailure> {
        match self {
            Predicate::Always => Ok(()),
            Predicate::QuantityRemaining { counter, initial } => {
                let remaining = input.quantities.get(counter).copied().unwrap_or(*initial);
                if remaining > 0 {
                    Ok(())
                } else {
                    Err(PredicateFailure::QuantityExhausted {
                        counter: counter.clone(),
                    })
                }
            }
            Predicate::DateRange {
                not_before,
                not_after,
            } => {
                if let Some(nb) = not_before.filter(|nb| input.now < *nb) {
                    return Err(PredicateFailure::NotYetValid { not_before: nb });
                }
                if let Some(na) = not_after.filter(|na| input.now > *na) {
                    return Err(PredicateFailure::NoLongerValid { not_after: na });
                }
                Ok(())
            }
            Predicate::Geofence(area) => match input.location {
                None => Err(PredicateFailure::LocationRequired),
                Some(point) if area.contains(&point) => Ok(()),
                Some(_) => Err(PredicateFailure::OutsideGeofence),
            },
            Predicate::PurposeMatch(allowed) => match input.purpose {
                None => Err(PredicateFailure::PurposeRequired),
                Some(p) if allowed.contains(p) => Ok(()),
                Some(_) => Err(PredicateFailure::PurposeMismatch),
            },
            Predicate::All(children) => children.iter().try_for_each(|c| c.evaluate(input)),
            Predicate::Any(children) => {
                let mut failures = Vec::new();
                for child in children {
                    match child.evaluate(input) {
                        Ok(()) => return Ok(()),
                        Err(f) => failures.push(f),
                    }
                }
                Err(PredicateFailure::NoAlternative { failures })
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Canonical form
    // ─────────────────────────────────────────────────────────────────────

    pub(crate) fn to_value(&self) -> Value {
        use canonical::{int, opt_int, text, uint};
        let items = match self {
            Predicate::Always => vec![uint(tags::ALWAYS)],
            Predicate::QuantityRemaining { counter, initial } => {
                vec![uint(tags::QUANTITY_REMAINING), text(counter), uint(*initial)]
            }
            Predicate::DateRange {
                not_before,
                not_after,
            } => vec![
                uint(tags::DATE_RANGE),
                opt_int(*not_before),
                opt_int(*not_after),
            ],
            Predicate::Geofence(area) => vec![
                uint(tags::GEOFENCE),
                int(area.min_lat_e6),
                int(area.max_lat_e6),
                int(area.min_lon_e6),
                int(area.max_lon_e6),
            ],
            Predicate::PurposeMatch(purposes) => vec![
                uint(tags::PURPOSE_MATCH),
                Value::Array(purposes.iter().map(|p| text(p.as_str())).collect()),
            ],
            Predicate::All(children) => vec![
                uint(tags::ALL),
                Value::Array(children.iter().map(Predicate::to_value).collect()),
            ],
            Predicate::Any(children) => vec![
                uint(tags::ANY),
                Value::Array(children.iter().map(Predicate::to_value).collect()),
            ],
        };
        Value::Array(items)
    }

    /// Canonical CBOR bytes of the tree.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CoreError> {
        canonical::encode(&self.to_value()).map_err(|e| CoreError::EncodingError(e.to_string()))
    }

    /// Decode and validate a canonical predicate section.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        let value = canonical::decode(bytes).map_err(|e| match e {
            canonical::CanonicalError::Malformed(reason) => {
                ParseError::malformed(Section::Predicate, reason)
            }
            _ => ParseError::NonCanonical(Section::Predicate),
        })?;
        let predicate = Self::from_value(&value, 1)?;
        predicate
            .validate()
            .map_err(|e| ParseError::malformed(Section::Predicate, e.to_string()))?;
        Ok(predicate)
    }

    fn from_value(value: &Value, depth: usize) -> Result<Self, ParseError> {
        if depth > MAX_PREDICATE_DEPTH {
            return Err(ParseError::PredicateTooDeep(MAX_PREDICATE_DEPTH));
        }
        let bad = |reason: &str| ParseError::malformed(Section::Predicate, reason);

        let items = match value {
            Value::Array(items) if !items.is_empty() => items,
            _ => return Err(bad("expected non-empty array")),
        };
        let tag = as_u64(&items[0]).ok_or_else(|| bad("invalid tag"))?;
        let args = &items[1..];

        let opt_ts = |v: &Value| -> Result<Option<Timestamp>, ParseError> {
            match v {
                Value::Null => Ok(None),
                other => as_i64(other).map(Some).ok_or_else(|| bad("invalid timestamp")),
            }
        };
        let coord = |v: &Value| as_i64(v).ok_or_else(|| bad("invalid coordinate"));
        let children = |v: &Value| -> Result<Vec<Predicate>, ParseError> {
            match v {
                Value::Array(list) => list
                    .iter()
                    .map(|c| Predicate::from_value(c, depth + 1))
                    .collect(),
                _ => Err(bad("expected child list")),
            }
        };

        match (tag, args) {
            (tags::ALWAYS, []) => Ok(Predicate::Always),
            (tags::QUANTITY_REMAINING, [Value::Text(counter), initial]) => {
                Ok(Predicate::QuantityRemaining {
                    counter: counter.clone(),
                    initial: as_u64(initial).ok_or_else(|| bad("invalid initial quantity"))?,
                })
            }
            (tags::DATE_RANGE, [nb, na]) => Ok(Predicate::DateRange {
                not_before: opt_ts(nb)?,
                not_after: opt_ts(na)?,
            }),
            (tags::GEOFENCE, [a, b, c, d]) => Ok(Predicate::Geofence(GeoBox {
                min_lat_e6: coord(a)?,
                max_lat_e6: coord(b)?,
                min_lon_e6: coord(c)?,
                max_lon_e6: coord(d)?,
            })),
            (tags::PURPOSE_MATCH, [Value::Array(list)]) => {
                let mut purposes = BTreeSet::new();
                for item in list {
                    let p = match item {
                        Value::Text(s) => Purpose::new(s.as_str())
                            .map_err(|e| bad(&e.to_string()))?,
                        _ => return Err(bad("invalid purpose")),
                    };
                    // The set order is the canonical order; anything else
                    // would re-encode differently.
                    if purposes.last().map_or(false, |last| last >= &p) {
                        return Err(ParseError::NonCanonical(Section::Predicate));
                    }
                    purposes.insert(p);
                }
                Ok(Predicate::PurposeMatch(purposes))
            }
            (tags::ALL, [list]) => Ok(Predicate::All(children(list)?)),
            (tags::ANY, [list]) => Ok(Predicate::Any(children(list)?)),
            _ => Err(bad("unknown predicate form")),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |f: &mut fmt::Formatter<'_>, sep: &str, children: &[Predicate]| {
            f.write_str("(")?;
            for (i, child) in children.iter().enumerate() {
                if i > 0 {
                    f.write_str(sep)?;
                }
                write!(f, "{child}")?;
            }
            f.write_str(")")
        };
        match self {
            Predicate::Always => f.write_str("always"),
            Predicate::QuantityRemaining { counter, .. } => write!(f, "{counter} > 0"),
            Predicate::DateRange {
                not_before,
                not_after,
            } => write!(
                f,
                "{} <= now <= {}",
                not_before.map_or("-inf".to_string(), |t| t.to_string()),
                not_after.map_or("+inf".to_string(), |t| t.to_string())
            ),
            Predicate::Geofence(area) => write!(
                f,
                "location in [{}..{}]x[{}..{}]",
                area.min_lat_e6, area.max_lat_e6, area.min_lon_e6, area.max_lon_e6
            ),
            Predicate::PurposeMatch(purposes) => {
                let names: Vec<&str> = purposes.iter().map(Purpose::as_str).collect();
                write!(f, "purpose in {{{}}}", names.join(", "))
            }
            Predicate::All(children) => join(f, " and ", children),
            Predicate::Any(children) => join(f, " or ", children),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn purpose(s: &str) -> Purpose {
        Purpose::new(s).unwrap()
    }

    fn input<'a>(quantities: &'a BTreeMap<String, u64>) -> PredicateInput<'a> {
        PredicateInput {
            now: 1_000,
            quantities,
            location: None,
            purpose: None,
        }
    }

    #[test]
    fn quantity_uses_initial_when_no_counter_supplied() {
        let p = Predicate::quantity("remaining_uses", 3);
        let empty = BTreeMap::new();
        assert!(p.evaluate(&input(&empty)).is_ok());

        let exhausted = BTreeMap::from([("remaining_uses".to_string(), 0)]);
        assert_eq!(
            p.evaluate(&input(&exhausted)),
            Err(PredicateFailure::QuantityExhausted {
                counter: "remaining_uses".into()
            })
        );
    }

    #[test]
    fn date_range_bounds_are_inclusive() {
        let p = Predicate::DateRange {
            not_before: Some(1_000),
            not_after: Some(1_000),
        };
        let q = BTreeMap::new();
        assert!(p.evaluate(&input(&q)).is_ok());
        let late = PredicateInput {
            now: 1_001,
            ..input(&q)
        };
        assert_eq!(
            p.evaluate(&late),
            Err(PredicateFailure::NoLongerValid { not_after: 1_000 })
        );
    }

    #[test]
    fn geofence_requires_location() {
        let area = GeoBox {
            min_lat_e6: 40_000_000,
            max_lat_e6: 41_000_000,
            min_lon_e6: -75_000_000,
            max_lon_e6: -73_000_000,
        };
        let p = Predicate::Geofence(area);
        let q = BTreeMap::new();
        let missing = p.evaluate(&input(&q)).unwrap_err();
        assert!(missing.is_missing_input());

        let inside = PredicateInput {
            location: Some(GeoPoint::new(40_712_000, -74_006_000)),
            ..input(&q)
        };
        assert!(p.evaluate(&inside).is_ok());

        let outside = PredicateInput {
            location: Some(GeoPoint::new(51_500_000, -120_000)),
            ..input(&q)
        };
        assert_eq!(p.evaluate(&outside), Err(PredicateFailure::OutsideGeofence));
    }

    #[test]
    fn any_reports_every_alternative() {
        let p = Predicate::Any(vec![
            Predicate::purposes([purpose("treatment")]),
            Predicate::quantity("uses", 0),
        ]);
        let q = BTreeMap::new();
        let treatment = purpose("treatment");
        let ok = PredicateInput {
            purpose: Some(&treatment),
            ..input(&q)
        };
        assert!(p.evaluate(&ok).is_ok());

        match p.evaluate(&input(&q)) {
            Err(PredicateFailure::NoAlternative { failures }) => assert_eq!(failures.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn canonical_roundtrip() {
        let p = Predicate::All(vec![
            Predicate::quantity("remaining_uses", 3),
            Predicate::DateRange {
                not_before: None,
                not_after: Some(-5),
            },
            Predicate::Any(vec![
                Predicate::purposes([purpose("treatment"), purpose("billing")]),
                Predicate::Always,
            ]),
        ]);
        let bytes = p.to_bytes().unwrap();
        assert_eq!(Predicate::from_bytes(&bytes).unwrap(), p);
    }

    #[test]
    fn overly_deep_tree_rejected() {
        let mut p = Predicate::Always;
        for _ in 0..MAX_PREDICATE_DEPTH {
            p = Predicate::All(vec![p]);
        }
        assert_eq!(p.depth(), MAX_PREDICATE_DEPTH + 1);
        assert!(p.validate().is_err());

        let bytes = canonical::encode(&p.to_value()).unwrap();
        assert_eq!(
            Predicate::from_bytes(&bytes),
            Err(ParseError::PredicateTooDeep(MAX_PREDICATE_DEPTH))
        );
    }

    #[test]
    fn structural_validation() {
        assert!(Predicate::All(vec![]).validate().is_err());
        assert!(Predicate::quantity("", 1).validate().is_err());
        assert!(Predicate::DateRange {
            not_before: Some(10),
            not_after: Some(5)
        }
        .validate()
        .is_err());
        assert!(Predicate::Geofence(GeoBox {
            min_lat_e6: 0,
            max_lat_e6: 91_000_000,
            min_lon_e6: 0,
            max_lon_e6: 1,
        })
        .validate()
        .is_err());
    }

    #[test]
    fn counters_are_collected() {
        let p = Predicate::All(vec![
            Predicate::quantity("refills", 2),
            Predicate::Any(vec![Predicate::quantity("visits", 5), Predicate::Always]),
        ]);
        let counters = p.counters();
        assert_eq!(counters.get("refills"), Some(&2));
        assert_eq!(counters.get("visits"), Some(&5));
    }

    #[test]
    fn display_is_readable() {
        let p = Predicate::All(vec![Predicate::quantity("remaining_uses", 3), Predicate::Always]);
        assert_eq!(p.to_string(), "(remaining_uses > 0 and always)");
    }
}
