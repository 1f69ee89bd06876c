//! Query identity and bindings.
//!
//! Callers describe a read as a resource name plus filters; this module turns
//! that into a stable [`QueryKey`] and a fetch operation the cache engine can
//! run. Writes go through [`MutationBinding`], which invalidates the resources
//! it names once the write succeeds.

mod binding;
mod context;
pub mod fetch;
mod filters;
mod keys;
mod mutation;

pub use binding::{QueryBinding, QueryOptions, QueryState};
pub use context::{QueryContext, QueryDefaults};
pub use filters::{FilterSet, FilterValue, NormalizedFilterSet, NormalizedValue, normalize};
pub use keys::{KeySegment, KeyVariant, QueryKey, ResourceId};
pub use mutation::{
    MutationBinding, MutationMethod, MutationOperation, MutationOptions, MutationState,
};
