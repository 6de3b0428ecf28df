//! Explicit transaction context for one logical call chain.

use common::TransactionId;

use crate::propagation::{IsolationLevel, Propagation};

/// Describes the transaction a scope is running in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionDescriptor {
    pub transaction_id: TransactionId,
    /// Nesting level of the innermost scope using this transaction, from 1.
    pub depth: u32,
    pub isolation_level: IsolationLevel,
    /// The mode of the scope that opened this transaction.
    pub propagation: Propagation,
    /// The transaction set aside while this one runs, if any.
    pub suspended_parent: Option<TransactionId>,
}

pub(crate) struct ActiveTransaction<Tx> {
    pub(crate) descriptor: TransactionDescriptor,
    pub(crate) handle: Tx,
}

/// Position on the suspension stack a scope must unwind back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ScopeMark(usize);

/// The ambient transaction of a call chain, passed explicitly.
///
/// Holds at most one active transaction plus a stack of suspended ones.
/// Units of work receive `&mut Session` and hand it on to nested calls;
/// only [`Transactional`](crate::Transactional) changes what is active.
pub struct Session<Tx> {
    active: Option<ActiveTransaction<Tx>>,
    suspended: Vec<Option<ActiveTransaction<Tx>>>,
}

impl<Tx> Session<Tx> {
    /// Creates a session with no transaction.
    pub fn new() -> Self {
        Self {
            active: None,
            suspended: Vec::new(),
        }
    }

    /// Returns the active transaction's descriptor.
    pub fn current(&self) -> Option<&TransactionDescriptor> {
        self.active.as_ref().map(|a| &a.descriptor)
    }

    /// Returns true if a transaction is active.
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Returns the driver handle of the active transaction, for executing
    /// statements inside it.
    pub fn transaction(&mut self) -> Option<&mut Tx> {
        self.active.as_mut().map(|a| &mut a.handle)
    }

    /// Returns how many scopes are stacked on the active transaction, or 0.
    pub fn depth(&self) -> u32 {
        self.current().map_or(0, |d| d.depth)
    }

    /// Returns how many transactions are currently set aside.
    pub fn suspended_count(&self) -> usize {
        self.suspended.iter().filter(|s| s.is_some()).count()
    }

    /// Sets the active transaction aside (possibly none) and activates `next`.
    pub(crate) fn begin_scope(&mut self, descriptor: TransactionDescriptor, handle: Tx) -> ScopeMark {
        let mark = self.suspend();
        self.active = Some(ActiveTransaction { descriptor, handle });
        mark
    }

    /// Sets the active transaction aside, leaving none active.
    pub(crate) fn suspend(&mut self) -> ScopeMark {
        let mark = ScopeMark(self.suspended.len());
        self.suspended.push(self.active.take());
        mark
    }

    /// Restores what `mark` set aside and returns what was active in the
    /// scope.
    ///
    /// Deeper scopes that never restored their own state (their future was
    /// dropped mid-flight) are unwound first; their handles are dropped.
    pub(crate) fn resume(&mut self, mark: ScopeMark) -> Option<ActiveTransaction<Tx>> {
        self.unwind_to(mark.0 + 1);
        let scoped = self.active.take();
        self.active = self.suspended.pop().flatten();
        scoped
    }

    /// Enters a scope that joins the active transaction.
    pub(crate) fn join(&mut self) -> ScopeMark {
        if let Some(active) = self.active.as_mut() {
            active.descriptor.depth += 1;
        }
        ScopeMark(self.suspended.len())
    }

    /// Leaves a scope entered with [`join`](Self::join).
    pub(crate) fn leave(&mut self, mark: ScopeMark) {
        self.unwind_to(mark.0);
        if let Some(active) = self.active.as_mut() {
            active.descriptor.depth = active.descriptor.depth.saturating_sub(1).max(1);
        }
    }

    fn unwind_to(&mut self, len: usize) {
        while self.suspended.len() > len {
            self.active = self.suspended.pop().flatten();
        }
    }
}

impl<Tx> Default for Session<Tx> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Tx> std::fmt::Debug for Session<Tx> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("active", &self.current())
            .field(
                "suspended",
                &self
                    .suspended
                    .iter()
                    .map(|s| s.as_ref().map(|a| a.descriptor.transaction_id))
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}
