//! Transaction scope carried by a template

use std::sync::Mutex;

use rowmap_core::{ReadContext, ReadOnlyTransaction, ReadWriteTransaction, StoreError};

/// Ambient templates open an implicit transaction per call; bound templates
/// share the handle opened by `perform_*_transaction`. The handle is taken
/// out when the transaction finishes, so a bound template that escapes its
/// callback fails with `InvalidState`.
pub(crate) enum TxScope {
    Ambient,
    ReadWrite(Mutex<Option<Box<dyn ReadWriteTransaction>>>),
    ReadOnly(Mutex<Option<Box<dyn ReadOnlyTransaction>>>),
}

fn finished() -> StoreError {
    StoreError::InvalidState("transaction already finished".into())
}

impl TxScope {
    pub fn read_write(tx: Box<dyn ReadWriteTransaction>) -> Self {
        TxScope::ReadWrite(Mutex::new(Some(tx)))
    }

    pub fn read_only(tx: Box<dyn ReadOnlyTransaction>) -> Self {
        TxScope::ReadOnly(Mutex::new(Some(tx)))
    }

    pub fn is_bound(&self) -> bool {
        !matches!(self, TxScope::Ambient)
    }

    /// Runs `f` against the bound transaction's read context.
    /// `None` when ambient: the caller opens its own context.
    pub fn with_bound_read<T>(
        &self,
        f: impl FnOnce(&mut dyn ReadContext) -> Result<T, StoreError>,
    ) -> Option<Result<T, StoreError>> {
        match self {
            TxScope::Ambient => None,
            TxScope::ReadWrite(slot) => {
                let mut guard = slot.lock().expect("transaction slot poisoned");
                Some(match guard.as_mut() {
                    Some(tx) => f(tx.as_read_context()),
                    None => Err(finished()),
                })
            }
            TxScope::ReadOnly(slot) => {
                let mut guard = slot.lock().expect("transaction slot poisoned");
                Some(match guard.as_mut() {
                    Some(tx) => f(tx.as_read_context()),
                    None => Err(finished()),
                })
            }
        }
    }

    /// Runs `f` against the bound read/write transaction. A read-only scope
    /// cannot write; `None` when ambient.
    pub fn with_read_write<T>(
        &self,
        f: impl FnOnce(&mut dyn ReadWriteTransaction) -> Result<T, StoreError>,
    ) -> Option<Result<T, StoreError>> {
        match self {
            TxScope::Ambient => None,
            TxScope::ReadWrite(slot) => {
                let mut guard = slot.lock().expect("transaction slot poisoned");
                Some(match guard.as_mut() {
                    Some(tx) => f(tx.as_mut()),
                    None => Err(finished()),
                })
            }
            TxScope::ReadOnly(_) => Some(Err(StoreError::InvalidState(
                "cannot write inside a read-only transaction".into(),
            ))),
        }
    }

    pub fn take_read_write(&self) -> Result<Box<dyn ReadWriteTransaction>, StoreError> {
        match self {
            TxScope::ReadWrite(slot) => slot.lock().expect("transaction slot poisoned").take().ok_or_else(finished),
            _ => Err(StoreError::InvalidState("not a read/write transaction scope".into())),
        }
    }

    pub fn take_read_only(&self) -> Result<Box<dyn ReadOnlyTransaction>, StoreError> {
        match self {
            TxScope::ReadOnly(slot) => slot.lock().expect("transaction slot poisoned").take().ok_or_else(finished),
            _ => Err(StoreError::InvalidState("not a read-only transaction scope".into())),
        }
    }
}
