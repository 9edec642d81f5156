pub mod feed_store;
pub mod mutator;
pub mod page_fetcher;
pub mod reconciler;
pub mod served;

pub use feed_store::{FeedSnapshot, FeedStatus, FeedStore, LoadOutcome};
pub use mutator::Mutator;
pub use page_fetcher::{FeedPage, PageFetcher};
pub use reconciler::{Mutation, Reconciler, Reconciliation};
pub use served::{AccessPath, Served};
