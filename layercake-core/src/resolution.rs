use serde_json::Value;

/// Outcome of asking one source for a key. Failures travel separately as
/// `Err(Error)` so a miss can never be mistaken for a broken backend.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Hit(Value),
    Miss,
    /// A miss that also ends the search; lower layers are not consulted.
    Stop,
}

impl Resolution {
    pub fn hit(value: impl Into<Value>) -> Self {
        Self::Hit(value.into())
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }

    pub fn is_miss(&self) -> bool {
        matches!(self, Self::Miss)
    }

    pub fn halts(&self) -> bool {
        !self.is_miss()
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Hit(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            Self::Hit(value) => Some(value),
            _ => None,
        }
    }
}

/// `None` is a miss.
impl From<Option<Value>> for Resolution {
    fn from(value: Option<Value>) -> Self {
        value.map(Self::Hit).unwrap_or(Self::Miss)
    }
}
