pub mod accounts;
pub mod bfs;
pub mod commenters;
pub mod seeds;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod timeline;

pub use accounts::{AccountPool, AccountPoolStats, SearchOutcome};
pub use bfs::{CrawlOptions, GraphCrawler};
pub use commenters::{CommenterCrawler, CommenterOptions, CommenterStats};
pub use seeds::{SeedCollector, SeedOutcome};
pub use timeline::{TimelineOptions, TimelineScraper, TweetPager};
