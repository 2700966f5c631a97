//! Ordered attribute lists carried by requests.

use std::fmt;

/// One attribute and its printed value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pair {
    name: String,
    value: String,
}

impl Pair {
    /// Creates a pair.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Attribute name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attribute value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.name, self.value)
    }
}

/// Attribute list; names may repeat and order is preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PairList {
    pairs: Vec<Pair>,
}

impl PairList {
    /// Creates an empty list.
    #[must_use]
    pub const fn new() -> Self {
        Self { pairs: Vec::new() }
    }

    /// Appends a pair.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.pairs.push(Pair::new(name, value));
    }

    /// Replaces every pair called `name` with a single pair.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.remove(name);
        self.add(name, value);
    }

    /// Removes every pair called `name`, returning how many went.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.pairs.len();
        self.pairs.retain(|pair| !pair.name.eq_ignore_ascii_case(name));
        before - self.pairs.len()
    }

    /// Value of the first pair called `name`. Names compare
    /// case-insensitively.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|pair| pair.name.eq_ignore_ascii_case(name))
            .map(Pair::value)
    }

    /// Iterates over the pairs in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Pair> {
        self.pairs.iter()
    }

    /// Number of pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Returns `true` when the list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl<'a> IntoIterator for &'a PairList {
    type Item = &'a Pair;
    type IntoIter = std::slice::Iter<'a, Pair>;

    fn into_iter(self) -> Self::IntoIter {
        self.pairs.iter()
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for PairList {
    fn from_iter<It: IntoIterator<Item = (N, V)>>(iter: It) -> Self {
        Self {
            pairs: iter
                .into_iter()
                .map(|(name, value)| Pair::new(name, value))
                .collect(),
        }
    }
}
