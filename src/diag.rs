use crate::validator::Violation;

/// Which allocator operation produced a [`TraceEvent`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AllocOp {
    Init,
    Allocate,
    Deallocate,
    Resize,
    ZeroAllocate,
    Extend,
}

/// One structured record per mutating operation: what happened, to which
/// block (as an offset from the arena base), its resulting total size and
/// allocation state. A pass-through side channel for external logging, not
/// part of the allocation contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TraceEvent {
    pub op: AllocOp,
    pub offset: usize,
    pub size: usize,
    pub allocated: bool,
}

/// Receiver for diagnostic records. An allocator cannot log through anything
/// that allocates, so instead of pulling in a logging framework the embedder
/// hands us a sink and decides what to do with the stream. Wire one up with
/// [`crate::Config::sink`]; without one, diagnostics cost a branch per
/// operation.
pub trait DiagnosticSink {
    /// Called once per mutating operation.
    fn record(&mut self, event: TraceEvent);

    /// Called for each finding when the validator runs in a debug
    /// configuration and the heap turns out corrupted. Findings are fatal
    /// right after all of them have been reported.
    fn violation(&mut self, violation: &Violation) {
        let _ = violation;
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::{cell::RefCell, rc::Rc};

    use super::*;

    /// Sink that remembers everything. The allocator takes ownership of its
    /// sink, so this one shares its storage: clone it, box one copy into the
    /// config and assert through the other.
    #[derive(Default, Clone)]
    pub struct RecordingSink {
        pub events: Rc<RefCell<Vec<TraceEvent>>>,
        pub violations: Rc<RefCell<Vec<Violation>>>,
    }

    impl RecordingSink {
        pub fn ops(&self) -> Vec<AllocOp> {
            self.events.borrow().iter().map(|event| event.op).collect()
        }
    }

    impl DiagnosticSink for RecordingSink {
        fn record(&mut self, event: TraceEvent) {
            self.events.borrow_mut().push(event);
        }

        fn violation(&mut self, violation: &Violation) {
            self.violations.borrow_mut().push(violation.clone());
        }
    }
}
