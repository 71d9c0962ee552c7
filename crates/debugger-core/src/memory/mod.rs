//! Address-space geometry and the debugger's memory accessors.

mod accessor;
mod blob;
mod space;

pub use accessor::{lane_xor, SpaceAccessor};
pub use blob::BlobAccessor;
pub use space::{
    AccessSize, AddressSpaceConfig, AddressSpaceInfo, Endianness, SpaceRef, TranslateIntent,
    DATA_SPACE, IO_SPACE, PROGRAM_SPACE,
};
