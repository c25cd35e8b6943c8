//! Coordinator to worker wire format
//!
//! Messages are JSON objects discriminated by `type`. A `values` message may
//! carry any combination of media CSS, single URLs and raw srcsets; entries
//! arrive either as one object or as an array of them.

use serde::{Deserialize, Serialize};

/// Worker construction parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerInit {
    /// Absolute archive prefix including the timestamp,
    /// e.g. `http://localhost:8080/live/20180803160549`
    pub prefix: String,
    /// Default modifier code for unresolvable candidates.
    #[serde(rename = "mod", default = "default_mod")]
    pub modifier: String,
}

fn default_mod() -> String {
    String::from("mp_")
}

/// A single URL, already in the form the page would request it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SrcEntry {
    pub value: String,
    #[serde(rename = "mod")]
    pub modifier: String,
}

/// A raw srcset with the context needed to resolve relative candidates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SrcsetEntry {
    pub value: String,
    #[serde(rename = "mod")]
    pub modifier: String,
    #[serde(rename = "tagSrc", default, skip_serializing_if = "Option::is_none")]
    pub tag_src: Option<String>,
    #[serde(rename = "docBaseURI", default, skip_serializing_if = "Option::is_none")]
    pub doc_base_uri: Option<String>,
}

/// `{value}` or `[{value}, ...]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        Self::Many(Vec::new())
    }
}

impl<T> OneOrMany<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Self::One(item) => vec![item],
            Self::Many(items) => items,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Many(items) if items.is_empty())
    }

    pub fn push(&mut self, item: T) {
        match self {
            Self::Many(items) => items.push(item),
            Self::One(_) => {
                let mut items = std::mem::take(self).into_vec();
                items.push(item);
                *self = Self::Many(items);
            }
        }
    }
}

/// Payload of a `values` message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Values {
    /// Raw CSS text of `@media` blocks
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<String>,
    #[serde(default, skip_serializing_if = "OneOrMany::is_empty")]
    pub src: OneOrMany<SrcEntry>,
    #[serde(default, skip_serializing_if = "OneOrMany::is_empty")]
    pub srcset: OneOrMany<SrcsetEntry>,
}

impl Values {
    pub fn is_empty(&self) -> bool {
        self.media.is_empty() && self.src.is_empty() && self.srcset.is_empty()
    }
}

/// Messages accepted by the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkerMessage {
    #[serde(rename = "values")]
    Values(Values),
    /// Proxy mode: URLs are fetched exactly as given.
    #[serde(rename = "fetch-all")]
    FetchAll { values: Vec<String> },
}

impl WorkerMessage {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// `None` for anything that is not a worker message.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        Self::deserialize(value).ok()
    }
}
