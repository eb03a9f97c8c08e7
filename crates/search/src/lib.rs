//! Web-search side channel.
//!
//! A search gate (LLM yes/no with context extraction), a query-complexity
//! cache that sizes the token budget for each search, and the HTTP client
//! for the search provider itself.

pub mod complexity;
pub mod context;
pub mod search;

pub use complexity::{ComplexityTier, QueryComplexityCache};
pub use search::SearchClient;
