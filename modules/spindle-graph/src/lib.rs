pub mod memory;
pub mod pagerank;
pub mod store;

pub use memory::MemoryStore;
pub use pagerank::{pagerank, top_k, PageRankParams};
pub use store::{CredentialStore, GraphStore, JobStore};
