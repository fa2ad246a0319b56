use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

const REQUEST_PREFIX: &str = "req_";

/// Identifies one submitted command from submission to its terminal outcome.
///
/// Rendered as `req_<uuid v7>`, so ids sort in creation order.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RequestId(String);

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid request id: {0:?}")]
pub struct InvalidRequestId(String);

impl RequestId {
    pub fn new() -> Self {
        Self(format!("{REQUEST_PREFIX}{}", Uuid::now_v7()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RequestId {
    type Err = InvalidRequestId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.strip_prefix(REQUEST_PREFIX).map(Uuid::parse_str) {
            Some(Ok(_)) => Ok(Self(s.to_owned())),
            _ => Err(InvalidRequestId(s.to_owned())),
        }
    }
}

impl TryFrom<String> for RequestId {
    type Error = InvalidRequestId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RequestId> for String {
    fn from(id: RequestId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_id_has_prefix() {
        let id = RequestId::new();
        assert!(id.as_str().starts_with("req_"), "got: {id}");
    }

    #[test]
    fn request_ids_sort_in_creation_order() {
        let ids: Vec<RequestId> = (0..50).map(|_| RequestId::new()).collect();
        for w in ids.windows(2) {
            assert!(w[0].as_str() < w[1].as_str(), "not monotonic: {} >= {}", w[0], w[1]);
        }
    }

    #[test]
    fn parses_back_from_display() {
        let id = RequestId::new();
        let parsed: RequestId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn rejects_foreign_ids() {
        assert!("0190c3a2-7b1e-7000-8000-000000000000".parse::<RequestId>().is_err());
        assert!("sess_0190c3a2-7b1e-7000-8000-000000000000".parse::<RequestId>().is_err());
        assert_eq!(
            "req_nope".parse::<RequestId>(),
            Err(InvalidRequestId("req_nope".into()))
        );
    }

    #[test]
    fn serde_round_trips_and_validates() {
        let id = RequestId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        assert_eq!(serde_json::from_str::<RequestId>(&json).unwrap(), id);
        assert!(serde_json::from_str::<RequestId>("\"req_nope\"").is_err());
    }
}
