//! Transactional resource collaborators
//!
//! The engine never talks to a store directly. A batch owns one
//! [`ResourceProvider`] (its base resource) and mints one
//! [`TransactionalResource`] per worker thread from it.

/// Lazy sequence of item identifiers produced by a query
pub type QueryResults<'a> = Box<dyn Iterator<Item = anyhow::Result<String>> + 'a>;

/// The base resource of a batch.
///
/// `derive` is called concurrently from worker threads and must be safe
/// for that. The provider is closed exactly once, during batch teardown.
pub trait ResourceProvider: Send + Sync + 'static {
    /// Handle type minted for each worker thread
    type Resource: TransactionalResource;

    /// Mint a fresh handle
    fn derive(&self) -> anyhow::Result<Self::Resource>;

    /// Release the base resource
    fn close(&self);
}

/// A live transactional handle, owned by one thread at a time
pub trait TransactionalResource: Send + 'static {
    /// Persist all staged changes
    fn commit(&mut self) -> anyhow::Result<()>;

    /// Close the handle; staged changes are discarded
    fn close(&mut self);

    /// Whether the handle can still be used
    fn is_live(&self) -> bool;

    /// Execute a structured query and return matching item identifiers
    fn query(&mut self, statement: &str, language: &str) -> anyhow::Result<QueryResults<'_>>;
}
