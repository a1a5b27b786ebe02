use std::any::Any;
use std::sync::Arc;

/// An ordered, append-only registry of named resources, released strictly
/// last-in-first-out when the stack goes out of scope.
///
/// Acquiring through the stack means teardown never has to be sequenced by
/// hand: whatever exit path runs — normal completion, `?` propagation, or
/// a panic — drop glue unwinds the stack top-to-bottom, so a failure
/// mid-chain cannot leak or misorder earlier acquisitions.
///
/// Each entry holds one strong reference; [`adopt`](Self::adopt) hands a
/// shared handle back so the resource stays usable. A resource is actually
/// destroyed when its last strong reference goes, which for the common
/// chain (every child holding `Arc`s of its parents) is exactly the
/// reverse-of-acquisition order.
pub struct ScopeStack {
    entries: Vec<ScopeEntry>,
}

struct ScopeEntry {
    name: String,
    resource: Box<dyn Any>,
}

impl Default for ScopeStack {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeStack {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Append a named resource and return a shared handle to it.
    ///
    /// Re-using a name appends a new entry rather than overwriting: the
    /// earlier value keeps its place in the release order instead of being
    /// silently dropped out of sequence.
    pub fn adopt<T: 'static>(&mut self, name: impl Into<String>, resource: T) -> Arc<T> {
        let name = name.into();
        let shared = Arc::new(resource);
        tracing::trace!("Scope adopts `{name}`");
        self.entries.push(ScopeEntry {
            name,
            resource: Box::new(Arc::clone(&shared)),
        });
        shared
    }

    /// Append an already-shared resource under a name.
    pub fn adopt_shared<T: 'static>(&mut self, name: impl Into<String>, resource: Arc<T>) {
        let name = name.into();
        tracing::trace!("Scope adopts `{name}`");
        self.entries.push(ScopeEntry {
            name,
            resource: Box::new(resource),
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Drop for ScopeStack {
    fn drop(&mut self) {
        while let Some(entry) = self.entries.pop() {
            tracing::debug!("Scope releases `{}`", entry.name);
            drop(entry.resource);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Records its name into a shared log when dropped.
    struct ReleaseProbe {
        name: &'static str,
        log: Rc<RefCell<Vec<&'static str>>>,
    }

    impl Drop for ReleaseProbe {
        fn drop(&mut self) {
            self.log.borrow_mut().push(self.name);
        }
    }

    fn probe(name: &'static str, log: &Rc<RefCell<Vec<&'static str>>>) -> ReleaseProbe {
        ReleaseProbe {
            name,
            log: Rc::clone(log),
        }
    }

    #[test]
    fn releases_in_reverse_acquisition_order() {
        let log = Rc::new(RefCell::new(Vec::new()));

        {
            let mut scope = ScopeStack::new();
            scope.adopt("instance", probe("instance", &log));
            scope.adopt("device", probe("device", &log));
            scope.adopt("swapchain", probe("swapchain", &log));
            assert_eq!(scope.len(), 3);
        }

        assert_eq!(&*log.borrow(), &["swapchain", "device", "instance"]);
    }

    #[test]
    fn unwinds_on_the_failure_path_too() {
        let log = Rc::new(RefCell::new(Vec::new()));

        fn acquire_chain(
            log: &Rc<RefCell<Vec<&'static str>>>,
            scope: &mut ScopeStack,
        ) -> Result<(), &'static str> {
            scope.adopt("first", probe("first", log));
            scope.adopt("second", probe("second", log));
            Err("third acquisition failed")
        }

        let result = {
            let mut scope = ScopeStack::new();
            acquire_chain(&log, &mut scope)
        };

        assert!(result.is_err());
        assert_eq!(
            &*log.borrow(),
            &["second", "first"],
            "both acquisitions must release, newest first"
        );
    }

    #[test]
    fn releases_exactly_once_per_adoption() {
        let log = Rc::new(RefCell::new(Vec::new()));

        {
            let mut scope = ScopeStack::new();
            for _ in 0..4 {
                scope.adopt("entry", probe("entry", &log));
            }
        }

        assert_eq!(log.borrow().len(), 4);
    }

    #[test]
    fn readopting_a_name_appends_instead_of_overwriting() {
        let log = Rc::new(RefCell::new(Vec::new()));

        {
            let mut scope = ScopeStack::new();
            scope.adopt("swapchain", probe("old", &log));
            scope.adopt("framebuffer", probe("framebuffer", &log));
            scope.adopt("swapchain", probe("new", &log));
            assert_eq!(scope.len(), 3, "re-adoption must not overwrite");
        }

        // The replaced value releases in its original stack position, not
        // at the moment of re-adoption.
        assert_eq!(&*log.borrow(), &["new", "framebuffer", "old"]);
    }

    #[test]
    fn an_outstanding_handle_defers_destruction_past_the_scope() {
        let log = Rc::new(RefCell::new(Vec::new()));

        let kept = {
            let mut scope = ScopeStack::new();
            let kept = scope.adopt("kept", probe("kept", &log));
            scope.adopt("dropped", probe("dropped", &log));
            kept
        };

        // The scope released its reference, but the resource lives on in
        // the caller's hand.
        assert_eq!(&*log.borrow(), &["dropped"]);
        drop(kept);
        assert_eq!(&*log.borrow(), &["dropped", "kept"]);
    }
}
