//! Validity objects decide whether a cached output may still be served.

use std::{any::Any, fmt, sync::Arc, time::SystemTime};

use time::{Duration, OffsetDateTime};

/// Three-valued outcome of a validity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidityState {
    Valid,
    Invalid,
    /// Cannot decide alone; compare against a freshly computed validity.
    Unknown,
}

impl ValidityState {
    /// Conjunction: any `Invalid` wins, then any `Unknown`.
    pub fn and(self, other: ValidityState) -> ValidityState {
        match (self, other) {
            (ValidityState::Invalid, _) | (_, ValidityState::Invalid) => ValidityState::Invalid,
            (ValidityState::Unknown, _) | (_, ValidityState::Unknown) => ValidityState::Unknown,
            _ => ValidityState::Valid,
        }
    }

    fn from_bool(valid: bool) -> Self {
        if valid {
            ValidityState::Valid
        } else {
            ValidityState::Invalid
        }
    }
}

pub trait Validity: Send + Sync + fmt::Debug {
    fn is_valid(&self) -> ValidityState;

    /// Compare a stored validity with the one computed for the current request.
    /// Only consulted when [`Validity::is_valid`] answered `Unknown`.
    fn is_valid_against(&self, _fresh: &dyn Validity) -> ValidityState {
        ValidityState::Invalid
    }

    fn as_any(&self) -> &dyn Any;
}

/// AND of all stored validities, consulting `fresh` position by position where
/// a stored validity is undecided. A length mismatch or missing fresh
/// counterpart invalidates.
pub fn revalidate(stored: &[Arc<dyn Validity>], fresh: Option<&[Arc<dyn Validity>]>) -> ValidityState {
    stored
        .iter()
        .enumerate()
        .map(|(index, validity)| match validity.is_valid() {
            ValidityState::Unknown => match fresh {
                Some(fresh) if fresh.len() == stored.len() => {
                    validity.is_valid_against(fresh[index].as_ref())
                }
                _ => ValidityState::Invalid,
            },
            decided => decided,
        })
        .fold(ValidityState::Valid, ValidityState::and)
}

/// Valid until a fixed instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiresValidity {
    expires_at: OffsetDateTime,
}

impl ExpiresValidity {
    pub fn at(expires_at: OffsetDateTime) -> Self {
        Self { expires_at }
    }

    /// Valid for `seconds` from now. `None` when the instant is out of range.
    pub fn after_secs(seconds: i64) -> Option<Self> {
        OffsetDateTime::now_utc()
            .checked_add(Duration::seconds(seconds))
            .map(Self::at)
    }

    pub fn expires_at(&self) -> OffsetDateTime {
        self.expires_at
    }
}

impl Validity for ExpiresValidity {
    fn is_valid(&self) -> ValidityState {
        ValidityState::from_bool(OffsetDateTime::now_utc() < self.expires_at)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Valid while a source keeps the modification time it had when cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampValidity {
    modified: SystemTime,
}

impl TimestampValidity {
    pub fn new(modified: SystemTime) -> Self {
        Self { modified }
    }
}

impl Validity for TimestampValidity {
    fn is_valid(&self) -> ValidityState {
        ValidityState::Unknown
    }

    fn is_valid_against(&self, fresh: &dyn Validity) -> ValidityState {
        match fresh.as_any().downcast_ref::<TimestampValidity>() {
            Some(fresh) => ValidityState::from_bool(fresh.modified == self.modified),
            None => ValidityState::Invalid,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Always valid. For stages whose output never changes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NopValidity;

impl Validity for NopValidity {
    fn is_valid(&self) -> ValidityState {
        ValidityState::Valid
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Several validities treated as one.
#[derive(Debug, Clone, Default)]
pub struct AggregatedValidity {
    parts: Vec<Arc<dyn Validity>>,
}

impl AggregatedValidity {
    pub fn new(parts: Vec<Arc<dyn Validity>>) -> Self {
        Self { parts }
    }

    pub fn push(&mut self, part: Arc<dyn Validity>) {
        self.parts.push(part);
    }
}

impl Validity for AggregatedValidity {
    fn is_valid(&self) -> ValidityState {
        self.parts
            .iter()
            .map(|part| part.is_valid())
            .fold(ValidityState::Valid, ValidityState::and)
    }

    fn is_valid_against(&self, fresh: &dyn Validity) -> ValidityState {
        match fresh.as_any().downcast_ref::<AggregatedValidity>() {
            Some(fresh) => revalidate(&self.parts, Some(fresh.parts.as_slice())),
            None => ValidityState::Invalid,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration as StdDuration, UNIX_EPOCH};

    use super::*;

    fn stamp(secs: u64) -> Arc<dyn Validity> {
        Arc::new(TimestampValidity::new(UNIX_EPOCH + StdDuration::from_secs(secs)))
    }

    fn nop() -> Arc<dyn Validity> {
        Arc::new(NopValidity)
    }

    #[test]
    fn conjunction_prefers_invalid_then_unknown() {
        use ValidityState::*;
        assert_eq!(Valid.and(Valid), Valid);
        assert_eq!(Valid.and(Unknown), Unknown);
        assert_eq!(Unknown.and(Invalid), Invalid);
    }

    #[test]
    fn expires_validity_tracks_wall_clock() {
        let fresh = ExpiresValidity::after_secs(60).expect("in range");
        let stale = ExpiresValidity::after_secs(-1).expect("in range");
        assert_eq!(fresh.is_valid(), ValidityState::Valid);
        assert_eq!(stale.is_valid(), ValidityState::Invalid);
    }

    #[test]
    fn out_of_range_expiry_has_no_validity() {
        assert!(ExpiresValidity::after_secs(i64::MAX).is_none());
        assert!(ExpiresValidity::after_secs(i64::MIN).is_none());
    }

    #[test]
    fn timestamps_need_a_fresh_counterpart() {
        let stored = vec![stamp(10)];
        assert_eq!(revalidate(&stored, None), ValidityState::Invalid);
        assert_eq!(revalidate(&stored, Some(&[stamp(10)][..])), ValidityState::Valid);
        assert_eq!(revalidate(&stored, Some(&[stamp(11)][..])), ValidityState::Invalid);
    }

    #[test]
    fn one_invalid_part_invalidates_everything() {
        let expired: Arc<dyn Validity> = Arc::new(ExpiresValidity::after_secs(-5).expect("in range"));
        let stored = vec![nop(), expired];
        assert_eq!(revalidate(&stored, None), ValidityState::Invalid);
    }

    #[test]
    fn aggregated_validity_compares_pairwise() {
        let stored = AggregatedValidity::new(vec![nop(), stamp(3)]);
        let same = AggregatedValidity::new(vec![nop(), stamp(3)]);
        let newer = AggregatedValidity::new(vec![nop(), stamp(4)]);

        assert_eq!(stored.is_valid(), ValidityState::Unknown);
        assert_eq!(stored.is_valid_against(&same), ValidityState::Valid);
        assert_eq!(stored.is_valid_against(&newer), ValidityState::Invalid);
        assert_eq!(stored.is_valid_against(&NopValidity), ValidityState::Invalid);
    }
}
