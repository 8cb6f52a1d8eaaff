use crate::types::NativeHandle;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("stale native handle {0}")]
    Stale(NativeHandle),

    #[error("native handle {handle} holds {actual}, expected {expected}")]
    TypeMismatch {
        handle: NativeHandle,
        expected: &'static str,
        actual: &'static str,
    },
}
