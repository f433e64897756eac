// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The OAuth2 [scope] value.
//!
//! [scope]: https://datatracker.ietf.org/doc/html/rfc6749#section-3.3

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::convert::Infallible;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// An ordered list of permission tokens.
///
/// The wire encoding is a single space-delimited string. Two scopes are equal
/// when they contain the same components in the same order.
///
/// # Example
/// ```
/// # use identity_kit::scope::Scope;
/// let scope: Scope = "read  write".parse().unwrap();
/// assert_eq!(scope.components(), ["read", "write"]);
/// assert_eq!(scope.to_string(), "read write");
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Scope {
    components: Vec<String>,
}

impl Scope {
    /// Creates a scope from its components.
    ///
    /// Components are split on whitespace, so `["a b"]` yields `["a", "b"]`.
    pub fn new<I, S>(components: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let components = components
            .into_iter()
            .flat_map(|c| {
                c.as_ref()
                    .split_whitespace()
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .collect();
        Self { components }
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// The space-delimited encoding.
    pub fn value(&self) -> String {
        self.components.join(" ")
    }
}

impl FromStr for Scope {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Scope::new([s]))
    }
}

impl From<&str> for Scope {
    fn from(value: &str) -> Self {
        Scope::new([value])
    }
}

impl Display for Scope {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.value())
    }
}

impl Serialize for Scope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.value())
    }
}

impl<'de> Deserialize<'de> for Scope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(Scope::from(value.as_str()))
    }
}
