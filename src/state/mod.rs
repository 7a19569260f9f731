//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `CrawlItem`: One unit of crawl work with its matched rule and canonical id
//! - `ItemState`: Lifecycle of an item on the frontier (pending, in flight, done, ...)

mod item;
mod item_state;

// Re-export main types
pub use item::{CrawlItem, Discarded, ResourceId};
pub use item_state::ItemState;
