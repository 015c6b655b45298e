//! In-memory query cache.
//!
//! Every collection read goes through [`QueryCache`]. Entries are addressed
//! by [`CacheKey`] (collection, scope, optional variant) and move through
//! idle → loading → success/error. Reads are served from memory while fresh,
//! served stale while a background fetch revalidates them, seeded from the
//! persistent store on a cold start, and fetched from the remote otherwise.
//! Concurrent reads of one key share a single fetch.
//!
//! Base keys are written through to the persistent store. Variant keys
//! (derived views such as "enhanced" machines) live in memory only and are
//! invalidated whenever their scope's base data changes.

mod entry;
mod handle;
mod key;
mod options;
mod query;
mod subscription;

pub use entry::{EntryInfo, QueryState, Status};
pub use handle::Query;
pub use key::{CacheKey, KeyPattern};
pub use options::{fetcher, remote_fetcher, FetchResult, Fetcher, ReadOptions, DEFAULT_READ_RETRIES};
pub use query::{QueryCache, Snapshot};
pub use subscription::{CacheEvent, CacheEventKind, Listener, Subscription};
