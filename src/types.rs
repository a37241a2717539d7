//! Shared value types: timestamps, scopes, actors and patches
use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeMap;

/// Free-form answers keyed by question id.
pub type Responses = BTreeMap<String, String>;

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

// `Utc` itself is not `Ord`, so ordering is by instant
impl PartialOrd for TimeStamp<Utc> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeStamp<Utc> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

impl serde::Serialize for TimeStamp<Utc> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_rfc3339())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Member,
    Ceo,
}

/// Authenticated caller, as supplied by the identity collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub role: Role,
}

impl Actor {
    pub fn member(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::Member,
        }
    }
    pub fn ceo(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::Ceo,
        }
    }
    pub fn can_approve(&self) -> bool {
        self.role == Role::Ceo
    }
}

/// The (organization, period) pair: unit of write contention for submissions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeriodScope {
    pub org: String,
    pub period: String,
}

impl PeriodScope {
    pub fn new(org: impl Into<String>, period: impl Into<String>) -> Self {
        Self {
            org: org.into(),
            period: period.into(),
        }
    }
}

/// The (organization, actor, period) tuple: unit of write contention for drafts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DraftKey {
    pub org: String,
    pub actor: String,
    pub period: String,
}

impl DraftKey {
    pub fn new(org: impl Into<String>, actor: impl Into<String>, period: impl Into<String>) -> Self {
        Self {
            org: org.into(),
            actor: actor.into(),
            period: period.into(),
        }
    }
    pub fn scope(&self) -> PeriodScope {
        PeriodScope::new(self.org.clone(), self.period.clone())
    }
}

/// Field-level patch. Every `Some` field replaces the stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize)]
pub struct DraftPatch {
    pub responses: Option<Responses>,
    pub total_questions: Option<u32>,
    pub completed: Option<bool>,
}

impl DraftPatch {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_responses(mut self, responses: Responses) -> Self {
        self.responses = Some(responses);
        self
    }
    pub fn set_response(mut self, question: &str, answer: &str) -> Self {
        self.responses
            .get_or_insert_with(Responses::new)
            .insert(question.to_string(), answer.to_string());
        self
    }
    pub fn set_total_questions(mut self, total: u32) -> Self {
        self.total_questions = Some(total);
        self
    }
    pub fn set_completed(mut self, completed: bool) -> Self {
        self.completed = Some(completed);
        self
    }
    pub fn is_empty(&self) -> bool {
        self.responses.is_none() && self.total_questions.is_none() && self.completed.is_none()
    }
}

/// Metadata of an upload that finished against external object storage.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct UploadMeta {
    pub category: String,
    pub object_key: String,
    pub size: u64,
    pub content_type: String,
    pub storage_ref: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_order_by_instant() {
        let earlier = TimeStamp::new();
        let later = TimeStamp::new();
        assert!(earlier <= later);
        assert_eq!(earlier.cmp(&earlier.clone()), std::cmp::Ordering::Equal);

        let mut stamps = vec![later.clone(), earlier.clone()];
        stamps.sort();
        assert_eq!(stamps, vec![earlier, later]);
    }

    #[test]
    fn timestamp_encoding() {
        let original = TimeStamp::new();

        let encoding = minicbor::to_vec(original.clone()).unwrap();
        let decode: TimeStamp<Utc> = minicbor::decode(&encoding).unwrap();

        assert_eq!(original, decode);
    }

    #[test]
    fn patch_builder_accumulates_responses() {
        let patch = DraftPatch::new()
            .set_response("q1", "yes")
            .set_response("q2", "no")
            .set_total_questions(2);

        let responses = patch.responses.as_ref().unwrap();
        assert_eq!(responses.len(), 2);
        assert_eq!(responses["q1"], "yes");
        assert_eq!(patch.completed, None);
        assert!(!patch.is_empty());
        assert!(DraftPatch::new().is_empty());
    }

    #[test]
    fn only_ceo_can_approve() {
        assert!(Actor::ceo("boss").can_approve());
        assert!(!Actor::member("U1").can_approve());
    }
}
