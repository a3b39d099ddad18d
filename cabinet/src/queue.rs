//! Michael–Scott FIFO over heap cells.
//!
//! Nodes are two-element arrays `[value, next]`; the anchor is a two-element
//! array `[head, tail]`. Every link update goes through the cabinet's atomic
//! primitives, so the queue itself holds no lock.

use crate::{Cabinet, Ptr, Result, object::layout::ARRAY_ITEMS};

const VALUE: usize = 0;
const NEXT: usize = 1;

#[inline]
fn slot(node: Ptr, index: usize) -> Ptr {
    node.add((ARRAY_ITEMS + index * Ptr::SIZE) as u32)
}

#[derive(Debug, Clone)]
pub struct LockFreeQueue {
    cabinet: Cabinet,
    head: Ptr,
    tail: Ptr,
}

impl LockFreeQueue {
    pub fn new(cabinet: Cabinet) -> Result<Self> {
        let sentinel = cabinet.alloc_array(&[Ptr::NULL, Ptr::NULL])?;
        let anchor = cabinet.alloc_array(&[sentinel, sentinel])?;
        let head = cabinet.array_slot(anchor, 0)?;
        let tail = cabinet.array_slot(anchor, 1)?;
        Ok(Self {
            cabinet,
            head,
            tail,
        })
    }

    pub fn enqueue(&self, value: Ptr) -> Result<()> {
        let node = self.cabinet.alloc_array(&[value, Ptr::NULL])?;
        loop {
            let tail = self.cabinet.load(self.tail)?;
            let next = self.cabinet.load(slot(tail, NEXT))?;
            if tail != self.cabinet.load(self.tail)? {
                continue;
            }
            if next.is_null() {
                if self
                    .cabinet
                    .compare_and_swap(slot(tail, NEXT), Ptr::NULL, node)?
                {
                    // linked: the enqueue has happened. A lagging tail is
                    // fixed up by whoever sees it next.
                    if let Err(err) = self.cabinet.compare_and_swap(self.tail, tail, node) {
                        log::debug!("enqueue left tail behind at {tail:?}: {err}");
                    }
                    return Ok(());
                }
            } else {
                self.cabinet.compare_and_swap(self.tail, tail, next)?;
            }
        }
    }

    pub fn dequeue(&self) -> Result<Option<Ptr>> {
        loop {
            let head = self.cabinet.load(self.head)?;
            let tail = self.cabinet.load(self.tail)?;
            let next = self.cabinet.load(slot(head, NEXT))?;
            if head != self.cabinet.load(self.head)? {
                continue;
            }
            if head == tail {
                if next.is_null() {
                    return Ok(None);
                }
                self.cabinet.compare_and_swap(self.tail, tail, next)?;
            } else {
                let value = self.cabinet.load(slot(next, VALUE))?;
                if self.cabinet.compare_and_swap(self.head, head, next)? {
                    return Ok(Some(value));
                }
            }
        }
    }

    pub fn is_empty(&self) -> Result<bool> {
        let head = self.cabinet.load(self.head)?;
        Ok(self.cabinet.load(slot(head, NEXT))?.is_null())
    }
}
