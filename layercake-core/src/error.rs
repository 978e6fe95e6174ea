use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors are `Clone` so a cache can hand the same failure to every waiter.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("malformed path '{path}': {reason}")]
    MalformedPath { path: String, reason: String },

    #[error("key '{0}' not found")]
    NotFound(String),

    #[error("template in '{key}' could not resolve placeholder '{placeholder}': {reason}")]
    TemplateResolution {
        key: String,
        placeholder: String,
        reason: String,
    },

    #[error("cyclic template expansion: {}", chain.join(" -> "))]
    CyclicTemplate { chain: Vec<String> },

    #[error("config '{config}' re-entered for '{path}' through a subtree")]
    CyclicSubtree { config: String, path: String },

    #[error("resolution of '{path}' exceeded the nesting limit of {limit}")]
    DepthExceeded { path: String, limit: usize },

    #[error("getter '{getter}' failed for '{key}': {failure}")]
    Getter {
        key: String,
        getter: String,
        failure: GetterFailure,
    },

    #[error("layer '{layer}' failed resolving '{path}': {source}")]
    Layer {
        layer: String,
        path: String,
        #[source]
        source: Box<Error>,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("load error: {0}")]
    Load(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GetterFailure {
    #[error("{0}")]
    Backend(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The lookup's own deadline passed, as opposed to a getter's timeout.
    #[error("lookup deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    #[error("cancelled")]
    Cancelled,

    #[error("transform failed: {0}")]
    Transform(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    MalformedPath,
    NotFound,
    TemplateResolution,
    CyclicTemplate,
    CyclicSubtree,
    DepthExceeded,
    Getter,
    Timeout,
    Config,
    Load,
}

impl Error {
    pub fn malformed(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn getter(
        key: impl Into<String>,
        getter: impl Into<String>,
        failure: GetterFailure,
    ) -> Self {
        Self::Getter {
            key: key.into(),
            getter: getter.into(),
            failure,
        }
    }

    pub fn in_layer(self, layer: &str, path: &str) -> Self {
        // Keep the innermost layer; an outer stack re-wrapping adds nothing.
        if matches!(self, Self::Layer { .. }) {
            return self;
        }
        Self::Layer {
            layer: layer.to_owned(),
            path: path.to_owned(),
            source: Box::new(self),
        }
    }

    /// The error with any layer context stripped.
    pub fn root(&self) -> &Error {
        match self {
            Self::Layer { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Layer { source, .. } => source.kind(),
            Self::MalformedPath { .. } => ErrorKind::MalformedPath,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::TemplateResolution { .. } => ErrorKind::TemplateResolution,
            Self::CyclicTemplate { .. } => ErrorKind::CyclicTemplate,
            Self::CyclicSubtree { .. } => ErrorKind::CyclicSubtree,
            Self::DepthExceeded { .. } => ErrorKind::DepthExceeded,
            Self::Getter {
                failure: GetterFailure::Timeout(_) | GetterFailure::DeadlineExceeded(_),
                ..
            } => ErrorKind::Timeout,
            Self::Getter { .. } => ErrorKind::Getter,
            Self::Config(_) => ErrorKind::Config,
            Self::Load(_) => ErrorKind::Load,
        }
    }

    /// Structural errors describe a broken configuration rather than a
    /// failed lookup and always surface, even when a default is supplied.
    pub fn is_structural(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::MalformedPath
                | ErrorKind::CyclicTemplate
                | ErrorKind::CyclicSubtree
                | ErrorKind::DepthExceeded
                | ErrorKind::Config
        )
    }

    /// Errors that describe the lookup in progress rather than the source:
    /// its cancellation, its deadline or its expansion chain. They must not
    /// be remembered for other lookups.
    pub fn is_lookup_scoped(&self) -> bool {
        match self.root() {
            Self::CyclicTemplate { .. }
            | Self::CyclicSubtree { .. }
            | Self::DepthExceeded { .. } => true,
            Self::Getter { failure, .. } => matches!(
                failure,
                GetterFailure::Cancelled | GetterFailure::DeadlineExceeded(_)
            ),
            _ => false,
        }
    }

    pub fn getter_failure(&self) -> Option<&GetterFailure> {
        match self.root() {
            Self::Getter { failure, .. } => Some(failure),
            _ => None,
        }
    }
}
