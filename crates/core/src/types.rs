use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Number;

/// HTTP headers keyed by name, each with every value it carried.
pub type Headers = BTreeMap<String, Vec<String>>;

/// An opaque token exactly as it appeared on the wire.
///
/// Hosts mint task and client identifiers either as integers or as
/// strings. The original representation is kept so that replies echo
/// back the same JSON type the host sent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Token {
    Number(Number),
    Text(String),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// Correlation token of one job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Token);

/// Identity a transport registered this worker under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub Token);

macro_rules! token_newtype {
    ($name:ident) => {
        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(Token::Number(value.into()))
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(Token::Text(value.to_string()))
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(Token::Text(value))
            }
        }
    };
}

token_newtype!(TaskId);
token_newtype!(ClientId);
