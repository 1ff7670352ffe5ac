use std::cell::RefCell;
use std::rc::Rc;

use crate::value::Value;

/// Identity of a single cons cell, used to key the [`crate::sourcemap::SourceMap`].
///
/// The empty list carries no cell and therefore no id; every non-empty
/// cursor is backed by a distinct heap allocation for the lifetime of the
/// program it belongs to, so the pointer is a stable, collision-free key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub usize);

#[derive(Debug)]
struct ListNode {
    head: Value,
    tail: RefCell<List>,
}

/// A singly-linked, structurally-immutable list of Logo values.
///
/// The empty list is represented by no allocation at all (`List(None)`),
/// which gives the "exactly one empty list" invariant for free and makes
/// `tail()` on the empty list trivially return another empty list without
/// needing a self-referential `Rc`.
#[derive(Debug, Clone)]
pub struct List(Option<Rc<ListNode>>);

impl List {
    pub fn empty() -> List {
        List(None)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    pub fn cons(head: Value, tail: List) -> List {
        List(Some(Rc::new(ListNode {
            head,
            tail: RefCell::new(tail),
        })))
    }

    pub fn head(&self) -> Option<&Value> {
        self.0.as_ref().map(|n| &n.head)
    }

    pub fn tail(&self) -> List {
        match &self.0 {
            Some(n) => n.tail.borrow().clone(),
            None => List::empty(),
        }
    }

    pub fn node_id(&self) -> Option<NodeId> {
        self.0.as_ref().map(|n| NodeId(Rc::as_ptr(n) as usize))
    }

    /// The last non-empty cursor of the list (`self` if empty).
    pub fn end(&self) -> List {
        let mut cur = self.clone();
        loop {
            let next = cur.tail();
            if next.is_empty() {
                return cur;
            }
            cur = next;
        }
    }

    pub fn count(&self) -> usize {
        self.iter().count()
    }

    pub fn iter(&self) -> ListIter {
        ListIter { cur: self.clone() }
    }

    pub fn cursors(&self) -> CursorIter {
        CursorIter { cur: self.clone() }
    }

    pub fn reverse(&self) -> List {
        let mut out = List::empty();
        for v in self.iter() {
            out = List::cons(v.clone(), out);
        }
        out
    }

    pub fn map(&self, mut f: impl FnMut(&Value) -> Value) -> List {
        let mut builder = ListBuilder::new();
        for v in self.iter() {
            builder.push(f(&v));
        }
        builder.build()
    }

    pub fn filter(&self, mut pred: impl FnMut(&Value) -> bool) -> List {
        let mut builder = ListBuilder::new();
        for v in self.iter() {
            if pred(&v) {
                builder.push(v.clone());
            }
        }
        builder.build()
    }

    pub fn from_values(values: impl IntoIterator<Item = Value>) -> List {
        let mut builder = ListBuilder::new();
        builder.concat(values);
        builder.build()
    }

    /// Structural, head-wise recursive equality. Cycles can't arise from
    /// normal list construction (lists are immutable once built), so no
    /// visitation bookkeeping is needed here unlike in `stringify`.
    pub fn equal(&self, other: &List) -> bool {
        match (self.head(), other.head()) {
            (None, None) => true,
            (Some(a), Some(b)) => {
                if !a.logo_eq(b) {
                    return false;
                }
                self.tail().equal(&other.tail())
            }
            _ => false,
        }
    }

    /// Render with the given outer delimiters; nested lists always use `[` `]`.
    pub fn stringify(&self, open: &str, close: &str, show_brackets_inner: bool) -> String {
        let mut seen: Vec<NodeId> = Vec::new();
        let mut out = String::new();
        out.push_str(open);
        let mut first = true;
        let mut cursor = self.clone();
        loop {
            if let Some(id) = cursor.node_id() {
                if seen.contains(&id) {
                    if !first {
                        out.push(' ');
                    }
                    out.push_str("<recursive>");
                    break;
                }
                seen.push(id);
            }
            match cursor.head() {
                None => break,
                Some(v) => {
                    if !first {
                        out.push(' ');
                    }
                    first = false;
                    out.push_str(&v.stringify_inner(show_brackets_inner, &mut seen));
                }
            }
            cursor = cursor.tail();
        }
        out.push_str(close);
        out
    }
}

pub struct ListIter {
    cur: List,
}

impl Iterator for ListIter {
    type Item = Value;
    fn next(&mut self) -> Option<Value> {
        let head = self.cur.head()?.clone();
        self.cur = self.cur.tail();
        Some(head)
    }
}

/// Yields cursors (the list itself at each position) rather than heads, so
/// callers can also inspect `cursor.tail()` or take its [`NodeId`].
pub struct CursorIter {
    cur: List,
}

impl Iterator for CursorIter {
    type Item = List;
    fn next(&mut self) -> Option<List> {
        if self.cur.is_empty() {
            return None;
        }
        let here = self.cur.clone();
        self.cur = self.cur.tail();
        Some(here)
    }
}

/// Amortized O(1) append builder. Mutates only the tail pointer of the node
/// it created last; any list handed out via `attach` is never mutated.
pub struct ListBuilder {
    head: List,
    end: List,
}

impl ListBuilder {
    pub fn new() -> Self {
        Self {
            head: List::empty(),
            end: List::empty(),
        }
    }

    /// Appends a single element, returning the new node's id for source-map
    /// registration.
    pub fn push(&mut self, value: Value) -> NodeId {
        let node = List::cons(value, List::empty());
        self.attach(node.clone());
        node.node_id().expect("just-created cons cell has an id")
    }

    pub fn concat(&mut self, values: impl IntoIterator<Item = Value>) {
        for v in values {
            self.push(v);
        }
    }

    /// Splices an existing list onto the end, taking over its structure.
    pub fn attach(&mut self, list: List) {
        if list.is_empty() {
            return;
        }
        match self.end.node_id() {
            Some(_) => {
                // SAFETY-free: `self.end` always refers to a cons cell we
                // own the only external reference to at this point in the
                // build; mutating its tail is the one sanctioned mutation.
                if let List(Some(rc)) = &self.end {
                    *rc.tail.borrow_mut() = list.clone();
                }
            }
            None => {
                self.head = list.clone();
            }
        }
        self.end = list.end();
    }

    pub fn build(self) -> List {
        self.head
    }
}

impl Default for ListBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(s: &str) -> Value {
        Value::word(s)
    }

    #[test]
    fn empty_list_is_its_own_tail() {
        let e = List::empty();
        assert!(e.is_empty());
        assert!(e.tail().is_empty());
    }

    #[test]
    fn builder_push_and_iterate() {
        let mut b = ListBuilder::new();
        b.push(Value::Number(1.0));
        b.push(Value::Number(2.0));
        b.push(Value::Number(3.0));
        let list = b.build();
        let collected: Vec<f64> = list.iter().map(|v| v.as_number().unwrap()).collect();
        assert_eq!(collected, vec![1.0, 2.0, 3.0]);
        assert_eq!(list.count(), 3);
    }

    #[test]
    fn reverse_is_involutive() {
        let list = List::from_values(vec![word("a"), word("b"), word("c")]);
        let back = list.reverse().reverse();
        assert!(list.equal(&back));
    }

    #[test]
    fn from_values_round_trips() {
        let src = vec![word("a"), word("b")];
        let list = List::from_values(src.clone());
        let collected: Vec<Value> = list.iter().collect();
        assert_eq!(collected.len(), src.len());
        for (a, b) in collected.iter().zip(src.iter()) {
            assert!(a.logo_eq(b));
        }
    }

    #[test]
    fn attach_splices_without_mutating_source() {
        let tail = List::from_values(vec![word("y"), word("z")]);
        let mut b = ListBuilder::new();
        b.push(word("x"));
        b.attach(tail.clone());
        let joined = b.build();
        assert_eq!(joined.count(), 3);
        assert_eq!(tail.count(), 2);
    }

    #[test]
    fn stringify_default_delimiters() {
        let list = List::from_values(vec![word("a"), word("b")]);
        assert_eq!(list.stringify("[", "]", true), "[a b]");
    }
}
