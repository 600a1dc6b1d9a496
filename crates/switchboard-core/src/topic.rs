//! Typed topic keys.
//!
//! The broker routes on plain strings. Application code goes through
//! [`Topic`] so that room keys are always spelled the same way on both sides
//! of the wire.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::ParseError;

const ORG_PREFIX: &str = "org:";
const THREAD_PREFIX: &str = "thread:";

/// Separator of topic lists on the wire; never part of an id.
pub const TOPIC_LIST_SEPARATOR: char = ',';

/// A routing key: an organization room or a conversation thread.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Topic {
    /// Organization room, `org:<id>`.
    Org(String),
    /// Conversation thread, `thread:<id>`.
    Thread(String),
}

impl Topic {
    /// Organization room topic. The id is not checked; see [`Topic::validate`].
    pub fn org(id: impl Into<String>) -> Self {
        Self::Org(id.into())
    }

    /// Thread topic. The id is not checked; see [`Topic::validate`].
    pub fn thread(id: impl Into<String>) -> Self {
        Self::Thread(id.into())
    }

    /// Check that `id` is usable as a topic id: non-empty, free of
    /// [`TOPIC_LIST_SEPARATOR`] and without leading or trailing whitespace.
    pub fn validate_id(id: &str) -> Result<(), ParseError> {
        if id.is_empty() || id.contains(TOPIC_LIST_SEPARATOR) || id.trim() != id {
            return Err(ParseError::InvalidTopicId(id.to_owned()));
        }
        Ok(())
    }

    /// [`Topic::validate_id`] applied to this topic's id.
    pub fn validate(&self) -> Result<(), ParseError> {
        Self::validate_id(self.id())
    }

    /// The bare identifier without the family prefix.
    pub fn id(&self) -> &str {
        match self {
            Self::Org(id) | Self::Thread(id) => id,
        }
    }

    /// The string key the broker routes on.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Org(id) => write!(f, "{ORG_PREFIX}{id}"),
            Self::Thread(id) => write!(f, "{THREAD_PREFIX}{id}"),
        }
    }
}

impl FromStr for Topic {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let topic = if let Some(id) = s.strip_prefix(ORG_PREFIX) {
            Self::Org(id.to_owned())
        } else if let Some(id) = s.strip_prefix(THREAD_PREFIX) {
            Self::Thread(id.to_owned())
        } else {
            return Err(ParseError::InvalidTopic(s.to_owned()));
        };
        topic.validate()?;
        Ok(topic)
    }
}

impl TryFrom<String> for Topic {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Topic> for String {
    fn from(topic: Topic) -> Self {
        topic.to_string()
    }
}
