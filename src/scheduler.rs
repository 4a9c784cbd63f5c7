//! Deferred writes for formatted attributes.
//!
//! An attribute whose value interleaves several parameters is recomputed once
//! per flush, not once per parameter write. Nodes are queued with
//! `mark_dirty`; the queue is drained by `flush_now`, or by `poll` once the
//! debounce deadline has passed. Every `mark_dirty` pushes the deadline out
//! again, so a burst of writes collapses into one flush.
//!
//! There is no background timer. The host loop calls `poll(Instant::now())`,
//! and tests call `flush_now()` directly.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::node_set::AttributeBinding;

pub const DEFAULT_WRITE_DELAY: Duration = Duration::from_millis(50);

thread_local! {
    static SHARED: Rc<WriteScheduler> = Rc::new(WriteScheduler::new(DEFAULT_WRITE_DELAY));
}

#[derive(Debug)]
pub struct WriteScheduler {
    delay: Duration,
    pending: RefCell<Vec<Rc<AttributeBinding>>>,
    deadline: Cell<Option<Instant>>,
    flushes: Cell<usize>,
}

impl WriteScheduler {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: RefCell::new(Vec::new()),
            deadline: Cell::new(None),
            flushes: Cell::new(0),
        }
    }

    /// The scheduler shared by everything on this thread that was not given
    /// its own
    pub fn shared() -> Rc<WriteScheduler> {
        SHARED.with(Rc::clone)
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Queue a node for recomputation. Re-marking a queued node only resets
    /// the deadline.
    pub fn mark_dirty(&self, binding: &Rc<AttributeBinding>) {
        if !binding.is_pending() {
            binding.set_pending(true);
            self.pending.borrow_mut().push(Rc::clone(binding));
        }
        self.deadline.set(Some(Instant::now() + self.delay));
    }

    pub fn pending_len(&self) -> usize {
        self.pending.borrow().len()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline.get()
    }

    /// Number of flushes that wrote at least one node
    pub fn flush_count(&self) -> usize {
        self.flushes.get()
    }

    /// Flush if the deadline has passed. Returns the number of nodes written.
    pub fn poll(&self, now: Instant) -> usize {
        match self.deadline.get() {
            Some(deadline) if now >= deadline => self.flush_now(),
            _ => 0,
        }
    }

    /// Recompute every queued node exactly once and clear the queue.
    /// Returns the number of nodes written.
    pub fn flush_now(&self) -> usize {
        self.deadline.set(None);
        let queued = std::mem::take(&mut *self.pending.borrow_mut());
        if queued.is_empty() {
            return 0;
        }

        let mut written = 0;
        for binding in queued {
            binding.set_pending(false);
            if binding.write() {
                written += 1;
            } else {
                tracing::warn!(
                    "skipping deferred write to \"{}\"; its element no longer exists",
                    binding.name().local
                );
            }
        }

        if written > 0 {
            self.flushes.set(self.flushes.get() + 1);
        }
        tracing::trace!("flushed {} formatted attribute(s)", written);
        written
    }
}

impl Default for WriteScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_WRITE_DELAY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{FormatTemplate, SubstitutionSource};
    use crate::dom::{attr_name, create_element, get_attribute, html_name};

    fn binding_for(el: &markup5ever_rcdom::Handle) -> (Rc<AttributeBinding>, SubstitutionSource) {
        let source = SubstitutionSource::Property("size".to_string());
        let format = FormatTemplate {
            parts: vec!["w-".to_string(), String::new()],
            slots: [(source.clone(), vec![1])].into_iter().collect(),
        };
        (AttributeBinding::new(el, attr_name("class"), &format), source)
    }

    #[test]
    fn test_remarking_is_deduplicated() {
        let scheduler = WriteScheduler::new(Duration::from_millis(10));
        let el = create_element(html_name("div"));
        let (binding, source) = binding_for(&el);

        for size in ["1", "2", "3"] {
            binding.fill(&source, size);
            scheduler.mark_dirty(&binding);
        }
        assert_eq!(scheduler.pending_len(), 1);
        assert_eq!(get_attribute(&el, "class"), None);

        assert_eq!(scheduler.flush_now(), 1);
        assert_eq!(scheduler.flush_count(), 1);
        assert_eq!(get_attribute(&el, "class").as_deref(), Some("w-3"));
        assert_eq!(scheduler.flush_now(), 0);
        assert_eq!(scheduler.flush_count(), 1);
    }

    #[test]
    fn test_poll_waits_for_deadline() {
        let scheduler = WriteScheduler::new(Duration::from_secs(60));
        let el = create_element(html_name("div"));
        let (binding, source) = binding_for(&el);
        binding.fill(&source, "9");
        scheduler.mark_dirty(&binding);

        let deadline = scheduler.deadline().unwrap();
        assert_eq!(scheduler.poll(deadline - Duration::from_secs(1)), 0);
        assert_eq!(scheduler.pending_len(), 1);
        assert_eq!(scheduler.poll(deadline), 1);
        assert!(scheduler.deadline().is_none());
    }

    #[test]
    fn test_flush_skips_dropped_nodes() {
        let scheduler = WriteScheduler::new(Duration::from_millis(10));
        let el = create_element(html_name("div"));
        let (binding, _) = binding_for(&el);
        scheduler.mark_dirty(&binding);
        drop(el);
        assert_eq!(scheduler.flush_now(), 0);
        assert_eq!(scheduler.pending_len(), 0);
    }
}
