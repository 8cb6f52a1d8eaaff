pub mod allocator;
pub mod error;
pub mod store;
pub mod types;

pub use allocator::HandleAllocator;
pub use error::StoreError;
pub use store::{NativeStore, ReleaseQueue};
pub use types::NativeHandle;
