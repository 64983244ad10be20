//! Thread-local execution context
//!
//! Tracks the item a worker thread is currently processing so nested logic
//! can attribute failures, and whether the thread is inside a resource scope.

use std::cell::{Cell, RefCell};

use crate::{BatchFlowError, Result};

thread_local! {
    static CURRENT_ITEM: RefCell<Option<String>> = const { RefCell::new(None) };
    static IN_RESOURCE_SCOPE: Cell<bool> = const { Cell::new(false) };
}

/// Item the calling thread is currently working on
pub fn current_item() -> Option<String> {
    CURRENT_ITEM.with(|item| item.borrow().clone())
}

/// Replace the calling thread's current item
pub fn set_current_item(item: Option<String>) {
    CURRENT_ITEM.with(|current| *current.borrow_mut() = item);
}

/// Binds an item for the lifetime of the guard, restoring the previous one on drop
pub(crate) struct ItemBinding {
    previous: Option<String>,
}

pub(crate) fn bind_item(item: Option<String>) -> ItemBinding {
    let previous = CURRENT_ITEM.with(|current| current.replace(item));
    ItemBinding { previous }
}

impl Drop for ItemBinding {
    fn drop(&mut self) {
        set_current_item(self.previous.take());
    }
}

/// Marks the calling thread as holding its resource handle
pub(crate) struct ResourceScope {
    _not_send: std::marker::PhantomData<*const ()>,
}

impl ResourceScope {
    pub(crate) fn enter() -> Result<Self> {
        if IN_RESOURCE_SCOPE.with(|scope| scope.replace(true)) {
            return Err(BatchFlowError::NestedResourceScope);
        }
        Ok(Self {
            _not_send: std::marker::PhantomData,
        })
    }
}

impl Drop for ResourceScope {
    fn drop(&mut self) {
        IN_RESOURCE_SCOPE.with(|scope| scope.set(false));
    }
}
