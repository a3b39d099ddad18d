//! Root registration and reachability tracing.
//!
//! There is no collector yet; tracing only reports what is live.

use std::collections::HashSet;

use crate::{CabinetShared, Object, Ptr, Result};

/// Exposes a host's live roots (VM stacks, globals, ...).
pub trait RootProvider: Send {
    fn visit_roots(&mut self, visitor: &mut dyn FnMut(&mut Ptr));
}

/// A fixed list of roots.
#[derive(Debug, Default, Clone)]
pub struct RootSet {
    pub roots: Vec<Ptr>,
}

impl RootProvider for RootSet {
    fn visit_roots(&mut self, visitor: &mut dyn FnMut(&mut Ptr)) {
        for root in &mut self.roots {
            visitor(root);
        }
    }
}

impl CabinetShared {
    /// Install `provider`, returning the one it replaces.
    pub fn set_root_provider(
        &self,
        provider: Box<dyn RootProvider>,
    ) -> Option<Box<dyn RootProvider>> {
        self.roots.lock().replace(provider)
    }

    pub fn take_root_provider(&self) -> Option<Box<dyn RootProvider>> {
        self.roots.lock().take()
    }

    /// Addresses of every pointer slot inside the object at `ptr`.
    pub fn scan(&self, ptr: Ptr) -> Result<Vec<Ptr>> {
        let object = self.decode(ptr)?;
        Ok(object
            .pointer_offsets()
            .into_iter()
            .map(|offset| ptr.add(offset as u32))
            .collect())
    }

    /// Every non-null object reachable from the registered roots.
    pub fn trace_reachable(&self) -> Result<HashSet<Ptr>> {
        let mut worklist = Vec::new();
        if let Some(provider) = self.roots.lock().as_mut() {
            provider.visit_roots(&mut |root| worklist.push(*root));
        }

        let mut marked = HashSet::new();
        while let Some(ptr) = worklist.pop() {
            if ptr.is_null() || !marked.insert(ptr) {
                continue;
            }
            let object = self.decode(ptr)?;
            if let Object::Upvalue(up) = object {
                // an open upvalue's location is a slot, not an object
                worklist.extend(up.closed);
                continue;
            }
            for offset in object.pointer_offsets() {
                worklist.push(self.read_ptr(ptr.add(offset as u32))?);
            }
        }
        log::debug!("traced {} reachable objects", marked.len());
        Ok(marked)
    }
}
