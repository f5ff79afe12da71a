//! RocksDB-backed document storage
//!
//! Objects and their secondary indexes live in a `TransactionDB`, split into
//! date-range partitions, each with a collection and an index Column Family.
//!
//! ## Key Encoding
//!
//! - Object: `{model_id}{topic}\0{object_id}`
//! - Index: `{model_id}{topic}\0{index_id}\0{field}\0...{field}\0[{object_id}]`
//!
//! - Model-topic relation: `\0\0\0\0{model_id}{topic}` in the collection CF
//!
//! Every value ends with a TTL mark (see `ttl_mark.rs`).
//!
//! ## Module Structure
//!
//! - `handler.rs`: database handle, partition creation, transaction helper
//! - `key_encoding.rs`: order-preserving key encoding/decoding
//! - `ttl_mark.rs`: expiry trailer and cached clock
//! - `merge.rs`: unique-key merge operator and TTL compaction filter
//! - `model_topics.rs`: per-partition count of objects by model and topic
//! - `partition.rs`: partition naming and lookup
//! - `index_update.rs`: index key diffing for create/update/delete
//! - `object.rs`: transactional object writes and reads
//! - `scan.rs`: index scans for find and count

mod handler;
mod index_update;
pub mod key_encoding;
mod merge;
mod model_topics;
mod object;
mod partition;
mod scan;
pub mod ttl_mark;

pub use handler::{RocksdbHandler, Transaction};
pub use index_update::{IndexKeyUpdate, IndexKeyUpdateSet, IndexOp};
pub use partition::{object_range, Partition};
pub use scan::ScanHit;
