//! Interfaces to external collaborators: imagery catalog, zonal reducer, retries

pub mod catalog;
pub mod reducer;
pub mod retry;

pub use catalog::{AttributeFilter, CatalogQuery, Comparison, ImageryCatalog, InMemoryCatalog, Product};
pub use reducer::{GridAreaReducer, ReduceParams, ZonalAreaReducer};
pub use retry::{with_retry, CancellationToken, RetryPolicy};
