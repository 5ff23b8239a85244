pub mod anchor;
pub mod header;
pub mod record;
pub mod utils;
pub mod varint;

pub use anchor::{anchor_prefix, Anchor, AnchorCollector, AnchorLayout};
pub use header::{DataHeader, IndexHeader, SIZE_DATA_HEADER, SIZE_INDEX_HEADER};
pub use record::{PairHeader, ValueWidth};
pub use utils::{index_path, max_kmer, prefix_interval, shared_prefix_len, PositionedReader};
