pub mod address;
pub mod cache;
pub mod error;
pub mod getter;
pub mod layer;
pub mod loaders;
pub mod logging;
pub mod lookup;
pub mod options;
pub mod resolution;
pub mod stack;
pub mod template;

pub use address::Address;
pub use cache::{Cache, CacheKey, CachePolicy, CacheStats, CachedGetter, CachedLayer};
pub use error::{Error, ErrorKind, GetterFailure, Result};
pub use getter::{Getter, GetterRequest};
pub use layer::{FlatLayer, GetterLayer, KeyExpansionLayer, Layer, StaticLayer, SubtreeLayer};
pub use lookup::LookupOptions;
pub use options::{EngineOptions, FallbackPolicy};
pub use resolution::Resolution;
pub use stack::{Config, ConfigBuilder, StackView};
