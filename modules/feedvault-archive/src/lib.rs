pub mod archive;
pub mod bridge;
pub mod car;
pub mod deal;
pub mod error;
pub mod media;
pub mod retrieve;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod upload;

pub use archive::{Archive, ArchiveReceipt};
pub use bridge::StorageBridge;
pub use car::{pack, raw_cid, PackedBundle};
pub use deal::{parse_deal_id, DealBroker};
pub use error::{ArchiveError, Result};
pub use media::{gateway_url, MediaArchiver, PinataArchiver};
pub use retrieve::{parse_cid, RetrievalSource, Retrieved, Retriever};
pub use upload::{StoreAck, Uploader};
