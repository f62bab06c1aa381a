//! Call-chain tracing context.
//!
//! A chain groups every hop of one logical call: the originating request and
//! any nested requests a service issues while handling it. The chain id stays
//! constant along the chain and the chain order grows with nesting depth.
//!
//! The context is an ordinary value owned by the unit of work processing a
//! request. It is established from the inbound request before dispatch,
//! handed to the service by reference, and cleared when processing ends.
//! [`ChainScope`] performs the clear on drop so panicking handlers cannot leak
//! chain state into later work.

use std::ops::{Deref, DerefMut};

use crate::request::Request;

/// Chain id and order for the request currently being processed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainContext {
    chain_id: Option<String>,
    chain_order: u32,
}

impl ChainContext {
    /// Creates an empty context.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            chain_id: None,
            chain_order: 0,
        }
    }

    /// Starts a new chain at order zero.
    #[must_use]
    pub fn root(chain_id: impl Into<String>) -> Self {
        Self {
            chain_id: Some(chain_id.into()),
            chain_order: 0,
        }
    }

    /// Adopts the chain carried by an inbound request.
    pub fn establish(&mut self, request: &Request) {
        self.set_chain_id(request.chain_id().map(str::to_owned));
        self.chain_order = request.chain_order();
    }

    /// Replaces the chain id.
    pub fn set_chain_id(&mut self, chain_id: Option<String>) {
        self.chain_id = chain_id;
    }

    /// Advances the chain order by one and returns the new value.
    ///
    /// The order saturates rather than wrapping, so it never decreases.
    pub const fn increment_chain_order(&mut self) -> u32 {
        self.chain_order = self.chain_order.saturating_add(1);
        self.chain_order
    }

    /// Stamps an outbound nested request with this chain, one level deeper.
    pub fn stamp(&mut self, request: &mut Request) {
        let order = self.increment_chain_order();
        request.set_chain(self.chain_id.clone(), order);
    }

    /// Forgets all chain state.
    pub fn clear(&mut self) {
        self.chain_id = None;
        self.chain_order = 0;
    }

    /// Returns `true` when no chain state remains.
    #[must_use]
    pub const fn is_clear(&self) -> bool {
        self.chain_id.is_none() && self.chain_order == 0
    }

    /// Current chain id.
    #[must_use]
    pub fn chain_id(&self) -> Option<&str> {
        self.chain_id.as_deref()
    }

    /// Current chain order.
    #[must_use]
    pub const fn chain_order(&self) -> u32 {
        self.chain_order
    }

    /// Borrows the context behind a guard that clears it when dropped.
    pub const fn scope(&mut self) -> ChainScope<'_> {
        ChainScope { context: self }
    }
}

/// Guard returned by [`ChainContext::scope`].
#[derive(Debug)]
pub struct ChainScope<'a> {
    context: &'a mut ChainContext,
}

impl Deref for ChainScope<'_> {
    type Target = ChainContext;

    fn deref(&self) -> &Self::Target {
        self.context
    }
}

impl DerefMut for ChainScope<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.context
    }
}

impl Drop for ChainScope<'_> {
    fn drop(&mut self) {
        self.context.clear();
    }
}
