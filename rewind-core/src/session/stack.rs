//! Call stack of active recordings and boundary markers

use crate::outcome::CaseKey;

/// One active call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallFrame {
    /// A recorded function being captured as a case
    Recorded(CaseKey),
    /// A boundary call in progress; hides the frames beneath it from nested stubs
    Boundary,
}

impl CallFrame {
    /// Case key of a recorded frame
    pub fn case(&self) -> Option<&CaseKey> {
        match self {
            CallFrame::Recorded(key) => Some(key),
            CallFrame::Boundary => None,
        }
    }
}

/// Active frames, most recent last
#[derive(Debug, Default, Clone)]
pub struct CallStack {
    frames: Vec<CallFrame>,
}

impl CallStack {
    /// Empty stack
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a frame
    pub fn push(&mut self, frame: CallFrame) {
        self.frames.push(frame);
    }

    /// Pop the top frame.
    ///
    /// # Panics
    ///
    /// Panics on an empty stack: every pop must pair with an earlier push.
    pub fn pop(&mut self) -> CallFrame {
        match self.frames.pop() {
            Some(frame) => frame,
            None => panic!("call stack underflow: pop without matching push"),
        }
    }

    /// Top frame
    pub fn top(&self) -> Option<&CallFrame> {
        self.frames.last()
    }

    /// Frame directly beneath the top
    pub fn current_caller_frame(&self) -> Option<&CallFrame> {
        let n = self.frames.len();
        if n < 2 { None } else { self.frames.get(n - 2) }
    }

    /// Recorded frames from the top down, stopping at the first boundary marker
    pub fn walk_from_top_until_boundary(&self) -> impl Iterator<Item = &CaseKey> {
        self.frames.iter().rev().map_while(CallFrame::case)
    }

    /// Whether `key` is on the stack
    pub fn contains_case(&self, key: &CaseKey) -> bool {
        self.frames.iter().any(|f| f.case() == Some(key))
    }

    /// Number of frames
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether no call is active
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Drop every frame
    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

#[cfg(test)]
mod stack_tests {
    use super::*;

    fn rec(f: &str, t: &str) -> CallFrame {
        CallFrame::Recorded(CaseKey::new(f, t))
    }

    #[test]
    fn test_caller_frame() {
        let mut stack = CallStack::new();
        assert!(stack.current_caller_frame().is_none());
        stack.push(rec("a", "1"));
        assert!(stack.current_caller_frame().is_none());
        stack.push(rec("b", "1"));
        assert_eq!(stack.current_caller_frame(), Some(&rec("a", "1")));
        assert_eq!(stack.pop(), rec("b", "1"));
    }

    #[test]
    fn test_walk_stops_at_boundary() {
        let mut stack = CallStack::new();
        stack.push(rec("outer", "1"));
        stack.push(CallFrame::Boundary);
        stack.push(rec("mid", "1"));
        stack.push(rec("inner", "1"));

        let walked: Vec<_> = stack.walk_from_top_until_boundary().map(|k| k.fcid.as_str()).collect();
        assert_eq!(walked, vec!["inner", "mid"]);

        stack.push(CallFrame::Boundary);
        assert_eq!(stack.walk_from_top_until_boundary().count(), 0);
        assert!(stack.contains_case(&CaseKey::new("outer", "1")));
    }

    #[test]
    #[should_panic(expected = "call stack underflow")]
    fn test_pop_empty_panics() {
        CallStack::new().pop();
    }
}
