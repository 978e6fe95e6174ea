use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{Error, Result};

pub const SEPARATOR: char = '.';

/// A parsed dotted key path. Segments never contain the separator and are
/// never empty, so splitting and rejoining is lossless.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    full: Arc<str>,
    segments: Arc<[String]>,
}

impl Address {
    pub fn parse(value: &str) -> Result<Self> {
        if value.is_empty() {
            return Err(Error::malformed(value, "path is empty"));
        }

        let mut segments = Vec::new();
        for (index, segment) in value.split(SEPARATOR).enumerate() {
            if segment.is_empty() {
                return Err(Error::malformed(
                    value,
                    format!("segment {index} is empty"),
                ));
            }
            segments.push(segment.to_owned());
        }

        Ok(Self {
            full: Arc::from(value),
            segments: segments.into(),
        })
    }

    pub fn from_segments<I, S>(segments: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments = segments.into_iter().map(Into::into).collect::<Vec<String>>();
        let full = segments.join(".");
        if segments.is_empty() {
            return Err(Error::malformed(full, "path is empty"));
        }
        if let Some(bad) = segments
            .iter()
            .find(|segment| segment.is_empty() || segment.contains(SEPARATOR))
        {
            return Err(Error::malformed(
                full.clone(),
                format!("invalid segment '{bad}'"),
            ));
        }

        Ok(Self {
            full: Arc::from(full.as_str()),
            segments: segments.into(),
        })
    }

    pub fn full(&self) -> &str {
        &self.full
    }

    pub fn head(&self) -> &str {
        &self.segments[0]
    }

    pub fn rest(&self) -> Option<Address> {
        self.skip(1)
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Number of segments, never zero.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// The address without its first `count` segments, or `None` when
    /// nothing remains.
    pub fn skip(&self, count: usize) -> Option<Address> {
        if count >= self.segments.len() {
            return None;
        }
        let remaining = &self.segments[count..];
        Some(Self {
            full: Arc::from(remaining.join(".").as_str()),
            segments: remaining.to_vec().into(),
        })
    }

    /// The first `count` segments as an address.
    pub fn prefix(&self, count: usize) -> Option<Address> {
        if count == 0 {
            return None;
        }
        if count >= self.segments.len() {
            return Some(self.clone());
        }
        let leading = &self.segments[..count];
        Some(Self {
            full: Arc::from(leading.join(".").as_str()),
            segments: leading.to_vec().into(),
        })
    }

    pub fn starts_with(&self, prefix: &Address) -> bool {
        self.segments.starts_with(&prefix.segments)
    }

    /// `None` if `prefix` does not lead this address; `Some(None)` when the
    /// address equals the prefix.
    pub fn strip_prefix(&self, prefix: &Address) -> Option<Option<Address>> {
        if !self.starts_with(prefix) {
            return None;
        }
        Some(self.skip(prefix.len()))
    }

    pub fn join(&self, other: &Address) -> Address {
        let mut segments = self.segments.to_vec();
        segments.extend(other.segments.iter().cloned());
        Self {
            full: Arc::from(format!("{}.{}", self.full, other.full).as_str()),
            segments: segments.into(),
        }
    }

    pub fn child(&self, segment: &str) -> Result<Address> {
        let child = Address::parse(segment)?;
        Ok(self.join(&child))
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        Self::parse(value)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full)
    }
}

impl AsRef<str> for Address {
    fn as_ref(&self) -> &str {
        &self.full
    }
}
