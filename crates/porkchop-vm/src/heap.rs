//! The tracing heap.
//!
//! Objects live in a slot arena addressed by [`ObjRef`] indices; freed
//! slots go on a free list and are reused. Collection is mark-and-sweep
//! with an adaptive threshold: a cycle triggers when the live count
//! exceeds the watermark, and afterwards the watermark becomes twice the
//! survivor count (at least 1024).

use crate::object::Obj;
use crate::value::{ObjRef, Value};

const INITIAL_WATERMARK: usize = 1024;

#[derive(Debug, Default)]
pub struct Heap {
    slots: Vec<Option<Obj>>,
    marks: Vec<bool>,
    free: Vec<u32>,
    num_objects: usize,
    max_objects: usize,
    /// Collection is suppressed while positive; constructors hold this
    /// across multi-step allocations.
    disable_gc: u32,
}

impl Heap {
    pub fn new() -> Self {
        Self {
            max_objects: INITIAL_WATERMARK,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.num_objects
    }

    pub fn is_empty(&self) -> bool {
        self.num_objects == 0
    }

    /// True when the next allocation should run a cycle first.
    pub fn should_collect(&self) -> bool {
        self.disable_gc == 0 && self.num_objects > self.max_objects
    }

    pub fn disable(&mut self) {
        self.disable_gc += 1;
    }

    pub fn enable(&mut self) {
        debug_assert!(self.disable_gc > 0);
        self.disable_gc -= 1;
    }

    /// Places an object, reusing a freed slot when one exists.
    pub fn insert(&mut self, obj: Obj) -> ObjRef {
        self.num_objects += 1;
        match self.free.pop() {
            Some(index) => {
                self.slots[index as usize] = Some(obj);
                ObjRef(index)
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Some(obj));
                self.marks.push(false);
                ObjRef(index)
            }
        }
    }

    pub fn get(&self, obj: ObjRef) -> &Obj {
        self.slots[obj.0 as usize]
            .as_ref()
            .unwrap_or_else(|| unreachable!("dangling object reference {}", obj.0))
    }

    pub fn get_mut(&mut self, obj: ObjRef) -> &mut Obj {
        self.slots[obj.0 as usize]
            .as_mut()
            .unwrap_or_else(|| unreachable!("dangling object reference {}", obj.0))
    }

    /// Marks everything reachable from `roots`. Null slots are skipped;
    /// the traversal is iterative so deeply nested structures cannot
    /// overflow the native stack.
    pub fn mark(&mut self, roots: impl IntoIterator<Item = Value>) {
        let mut worklist: Vec<ObjRef> = roots
            .into_iter()
            .filter(|value| !value.is_null_obj())
            .map(Value::as_obj)
            .collect();
        while let Some(obj) = worklist.pop() {
            let index = obj.0 as usize;
            if self.marks[index] {
                continue;
            }
            self.marks[index] = true;
            if let Some(object) = &self.slots[index] {
                object.walk(|value| {
                    if !value.is_null_obj() {
                        worklist.push(value.as_obj());
                    }
                });
            }
        }
    }

    /// Frees every unmarked object and clears the marks of survivors,
    /// then adapts the watermark.
    pub fn sweep(&mut self) {
        for index in 0..self.slots.len() {
            if self.marks[index] {
                self.marks[index] = false;
            } else if self.slots[index].is_some() {
                self.slots[index] = None;
                self.free.push(index as u32);
                self.num_objects -= 1;
            }
        }
        self.max_objects = (self.num_objects * 2).max(INITIAL_WATERMARK);
    }

    #[cfg(test)]
    pub fn is_live(&self, obj: ObjRef) -> bool {
        self.slots[obj.0 as usize].is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ListRepr;
    use porkchop_sem::Type;

    #[test]
    fn test_alloc_and_get() {
        let mut heap = Heap::new();
        let obj = heap.insert(Obj::Str("hi".to_owned()));
        assert!(matches!(heap.get(obj), Obj::Str(s) if s == "hi"));
        assert_eq!(heap.len(), 1);
    }

    #[test]
    fn test_sweep_collects_unreachable() {
        let mut heap = Heap::new();
        let kept = heap.insert(Obj::Str("kept".to_owned()));
        let dropped = heap.insert(Obj::Str("dropped".to_owned()));
        heap.mark([Value::from_obj(kept)]);
        heap.sweep();
        assert!(heap.is_live(kept));
        assert!(!heap.is_live(dropped));
        assert_eq!(heap.len(), 1);
    }

    #[test]
    fn test_mark_traverses_containers() {
        let mut heap = Heap::new();
        let element = heap.insert(Obj::Str("element".to_owned()));
        let list = heap.insert(Obj::List(ListRepr::Object {
            elements: vec![Value::from_obj(element)],
            element: Type::STRING,
        }));
        heap.mark([Value::from_obj(list)]);
        heap.sweep();
        assert!(heap.is_live(element));
        assert!(heap.is_live(list));
    }

    #[test]
    fn test_slots_are_reused() {
        let mut heap = Heap::new();
        let first = heap.insert(Obj::Str("a".to_owned()));
        heap.mark([]);
        heap.sweep();
        let second = heap.insert(Obj::Str("b".to_owned()));
        assert_eq!(first, second);
    }

    #[test]
    fn test_marks_reset_after_sweep() {
        let mut heap = Heap::new();
        let obj = heap.insert(Obj::Str("a".to_owned()));
        heap.mark([Value::from_obj(obj)]);
        heap.sweep();
        // a second unmarked cycle must now collect it
        heap.mark([]);
        heap.sweep();
        assert!(!heap.is_live(obj));
    }

    #[test]
    fn test_watermark_adapts() {
        let mut heap = Heap::new();
        for _ in 0..2000 {
            heap.insert(Obj::Str(String::new()));
        }
        assert!(heap.should_collect());
        heap.disable();
        assert!(!heap.should_collect());
        heap.enable();
        heap.mark([]);
        heap.sweep();
        assert!(!heap.should_collect());
    }
}
