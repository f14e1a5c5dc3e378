//! Ordered log of pending writes with stable references.
//!
//! Removing one entry must not disturb references to any other entry, and a
//! reference to the removed entry must be repositionable to its in-log
//! predecessor. A contiguous vector cannot provide that, so entries live in
//! an arena threaded as a doubly-linked list. References carry a generation
//! tag: a reference to a removed entry is reported stale instead of silently
//! reading the slot's next tenant.

use thiserror::Error;

/// Stable reference to a live entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EntryRef {
    index: u32,
    generation: u32,
}

/// Position between entries: `None` is the "before first" sentinel,
/// `Some(r)` sits on the entry `r` (everything up to and including it has
/// been consumed).
pub type Cursor = Option<EntryRef>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TrackedListError {
    #[error("stale entry reference {index}:{generation}")]
    Stale { index: u32, generation: u32 },
}

#[derive(Debug)]
struct Body<T> {
    value: T,
    prev: Option<u32>,
    next: Option<u32>,
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    body: Option<Body<T>>,
}

#[derive(Debug)]
pub struct TrackedList<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    head: Option<u32>,
    tail: Option<u32>,
    len: usize,
}

impl<T> TrackedList<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn first(&self) -> Option<EntryRef> {
        self.head.map(|index| EntryRef {
            index,
            generation: self.slots[index as usize].generation,
        })
    }

    pub fn last(&self) -> Option<EntryRef> {
        self.tail.map(|index| EntryRef {
            index,
            generation: self.slots[index as usize].generation,
        })
    }

    /// Append at the tail and return the new entry's reference.
    pub fn push_back(&mut self, value: T) -> EntryRef {
        let index = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.body = Some(Body {
                    value,
                    prev: self.tail,
                    next: None,
                });
                index
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    body: Some(Body {
                        value,
                        prev: self.tail,
                        next: None,
                    }),
                });
                index
            }
        };

        match self.tail {
            Some(tail) => {
                let body = self.slots[tail as usize]
                    .body
                    .as_mut()
                    .expect("corrupt tracked-list link: free tail");
                body.next = Some(index);
            }
            None => self.head = Some(index),
        }
        self.tail = Some(index);
        self.len += 1;

        EntryRef {
            index,
            generation: self.slots[index as usize].generation,
        }
    }

    pub fn get(&self, entry: EntryRef) -> Result<&T, TrackedListError> {
        let body = self.resolve(entry)?;
        Ok(&body.value)
    }

    pub fn get_mut(&mut self, entry: EntryRef) -> Result<&mut T, TrackedListError> {
        let slot = self
            .slots
            .get_mut(entry.index as usize)
            .filter(|slot| slot.generation == entry.generation);
        match slot.and_then(|slot| slot.body.as_mut()) {
            Some(body) => Ok(&mut body.value),
            None => Err(stale(entry)),
        }
    }

    /// The entry after `cursor`: the head when the cursor is the sentinel,
    /// the link successor otherwise.
    pub fn next(&self, cursor: Cursor) -> Result<Option<EntryRef>, TrackedListError> {
        let next = match cursor {
            None => self.head,
            Some(entry) => self.resolve(entry)?.next,
        };
        Ok(next.map(|index| EntryRef {
            index,
            generation: self.slots[index as usize].generation,
        }))
    }

    /// Unlink `entry` and return its value together with the cursor of its
    /// predecessor (the sentinel when `entry` was the head). Every other
    /// entry's reference stays valid.
    pub fn remove(&mut self, entry: EntryRef) -> Result<(T, Cursor), TrackedListError> {
        self.resolve(entry)?;
        let slot = &mut self.slots[entry.index as usize];
        let body = slot
            .body
            .take()
            .expect("corrupt tracked-list link: resolved entry vanished");
        slot.generation = slot.generation.wrapping_add(1);

        match body.prev {
            Some(prev) => {
                let prev_body = self.slots[prev as usize]
                    .body
                    .as_mut()
                    .expect("corrupt tracked-list link: free predecessor");
                prev_body.next = body.next;
            }
            None => self.head = body.next,
        }
        match body.next {
            Some(next) => {
                let next_body = self.slots[next as usize]
                    .body
                    .as_mut()
                    .expect("corrupt tracked-list link: free successor");
                next_body.prev = body.prev;
            }
            None => self.tail = body.prev,
        }

        self.free.push(entry.index);
        self.len -= 1;

        let predecessor = body.prev.map(|index| EntryRef {
            index,
            generation: self.slots[index as usize].generation,
        });
        Ok((body.value, predecessor))
    }

    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            list: self,
            at: self.head,
        }
    }

    /// Visit every live entry mutably. Visit order is unspecified.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.slots
            .iter_mut()
            .filter_map(|slot| slot.body.as_mut().map(|body| &mut body.value))
    }

    fn resolve(&self, entry: EntryRef) -> Result<&Body<T>, TrackedListError> {
        self.slots
            .get(entry.index as usize)
            .filter(|slot| slot.generation == entry.generation)
            .and_then(|slot| slot.body.as_ref())
            .ok_or_else(|| stale(entry))
    }
}

impl<T> Default for TrackedList<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Iter<'a, T> {
    list: &'a TrackedList<T>,
    at: Option<u32>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = (EntryRef, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.at?;
        let slot = &self.list.slots[index as usize];
        let body = slot.body.as_ref()?;
        self.at = body.next;
        Some((
            EntryRef {
                index,
                generation: slot.generation,
            },
            &body.value,
        ))
    }
}

fn stale(entry: EntryRef) -> TrackedListError {
    TrackedListError::Stale {
        index: entry.index,
        generation: entry.generation,
    }
}
