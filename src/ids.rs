//! Strongly-typed identifiers shared by the API clients and the preview pipeline.
//!
//! Every identifier trims surrounding whitespace, converts from `&str`/`String`
//! and serializes as a plain JSON string.

use std::{borrow::Borrow, fmt};

use serde::{Deserialize, Serialize};

macro_rules! string_id_type {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
        #[serde(from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into().trim().to_string())
            }

            pub fn as_str(&self) -> &str {
                self.0.as_str()
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                $name::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                $name::new(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                self.as_str()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_id_type!(WorkflowId, "Identifier of a saved workflow.");
string_id_type!(NodeId, "Identifier of a node inside a workflow graph.");
string_id_type!(ExecutionId, "Identifier of one workflow execution (a run).");
string_id_type!(DraftId, "Identifier of a server-persisted preview draft.");
string_id_type!(SlotId, "Identifier of a slot in a platform post template (e.g. `headline`).");
string_id_type!(PlatformId, "Identifier of a target publishing platform (e.g. `linkedin`).");
string_id_type!(OutputKey, "Name of a declared node output port.");
