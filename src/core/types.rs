//! Identity and symbol types shared across the engine.

use std::fmt;

/// Identifies a callable the VM can invoke: a Lua-style closure prototype, a
/// light C function pointer, or a C closure's function pointer. Two frames
/// that run the same prototype collapse onto the same call-tree node; two
/// distinct native functions never collide even if their first invocation
/// happens to look the same from the VM's debug info.
///
/// The host embedding is responsible for handing back a stable, unique value
/// per callable (typically the address of the prototype/function). This
/// crate treats it as an opaque key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Prototype(pub u64);

impl Prototype {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Prototype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<u64> for Prototype {
    fn from(v: u64) -> Self {
        Prototype(v)
    }
}

/// Resolved human-readable identity of a [`Prototype`], memoized by
/// [`crate::symbol::SymbolTable`].
///
/// Native frames fall back to `cfunc@<pointer>` / `source = "=[C]"` /
/// `line = 0`. Script frames with no debug name fall back to `"anonymous"`
/// when `linedefined != 0`, or `"chunk"` when the prototype is the file's
/// top-level chunk.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SymbolInfo {
    pub name: String,
    pub source: String,
    pub line: i64,
}

impl fmt::Display for SymbolInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}:{}", self.name, self.source, self.line)
    }
}
