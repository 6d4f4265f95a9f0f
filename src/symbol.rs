//! Resolves [`Prototype`]s to human-readable [`SymbolInfo`], memoized so a
//! hot function is only looked up through the host once.

use crate::core::types::{Prototype, SymbolInfo};
use crate::core::IntMap;
use crate::host::{DebugInfo, FrameInfo, HostVm};

pub struct SymbolTable {
    cache: IntMap<SymbolInfo>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable {
            cache: IntMap::new(),
        }
    }

    /// Looks up `prototype`'s symbol, querying `host` and memoizing on miss.
    ///
    /// `coroutine` identifies which live debug stack to walk when `prototype`
    /// turns out to be a native frame with no line/source of its own — the
    /// resolver needs to know *where on the stack* this prototype is running
    /// right now, not just what it is.
    pub fn resolve<H: HostVm>(
        &mut self,
        host: &H,
        coroutine: H::CoroutineId,
        prototype: Prototype,
    ) -> &SymbolInfo {
        if !self.cache.contains_key(prototype.as_u64()) {
            let info = host.debug_info(prototype);
            let symbol = if info.is_native {
                Self::resolve_native(prototype, &info, &host.debug_frames(coroutine))
            } else {
                Self::resolve_script(&info)
            };
            self.cache.set(prototype.as_u64(), symbol);
        }
        self.cache
            .query(prototype.as_u64())
            .expect("just inserted")
    }

    /// A native ('C') frame has no line or source of its own. Before
    /// settling for the `=[C]`/0 fallback, walk the coroutine's live debug
    /// stack outward (towards the caller) for the nearest enclosing
    /// non-native frame and adopt *its* current line and source — the point
    /// is to show where in the script the native call was made from.
    fn resolve_native(prototype: Prototype, info: &DebugInfo, frames: &[FrameInfo]) -> SymbolInfo {
        let name = info
            .name
            .clone()
            .unwrap_or_else(|| format!("cfunc@{:#x}", prototype.as_u64()));

        let enclosing = frames
            .iter()
            .position(|f| f.prototype == prototype)
            .and_then(|pos| frames[..pos].iter().rev().find(|f| !f.is_native));

        match enclosing {
            Some(frame) => SymbolInfo {
                name,
                source: frame.source.clone().unwrap_or_default(),
                line: frame.current_line,
            },
            None => SymbolInfo {
                name,
                source: "=[C]".to_string(),
                line: 0,
            },
        }
    }

    fn resolve_script(info: &DebugInfo) -> SymbolInfo {
        let name = info.name.clone().unwrap_or_else(|| {
            if info.linedefined != 0 {
                "anonymous".to_string()
            } else {
                "chunk".to_string()
            }
        });

        SymbolInfo {
            name,
            source: info.source.clone().unwrap_or_default(),
            line: info.linedefined,
        }
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::TestVm;

    #[test]
    fn native_function_without_a_name_falls_back_to_cfunc_pointer() {
        let vm = TestVm::new();
        let mut table = SymbolTable::new();
        let symbol = table.resolve(&vm, 0, Prototype(0x1234));
        assert_eq!(symbol.name, "cfunc@0x1234");
        assert_eq!(symbol.source, "=[C]");
        assert_eq!(symbol.line, 0);
    }

    #[test]
    fn anonymous_script_function_falls_back_by_linedefined() {
        let mut vm = TestVm::new();
        vm.register_function(
            Prototype(1),
            DebugInfo::script(None, "main.lua", 10),
        );
        vm.register_function(Prototype(2), DebugInfo::script(None, "main.lua", 0));
        let mut table = SymbolTable::new();
        assert_eq!(table.resolve(&vm, 0, Prototype(1)).name, "anonymous");
        assert_eq!(table.resolve(&vm, 0, Prototype(2)).name, "chunk");
    }

    #[test]
    fn resolution_is_memoized() {
        let mut vm = TestVm::new();
        vm.register_function(
            Prototype(1),
            DebugInfo::script(Some("foo".to_string()), "main.lua", 10),
        );
        let mut table = SymbolTable::new();
        table.resolve(&vm, 0, Prototype(1));
        assert_eq!(table.len(), 1);
        table.resolve(&vm, 0, Prototype(1));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn native_frame_adopts_the_enclosing_script_frames_current_line() {
        let mut vm = TestVm::new();
        vm.register_function(
            Prototype(1),
            DebugInfo::script(Some("outer".to_string()), "m.lua", 1),
        );
        vm.register_function(Prototype(2), DebugInfo::native("pairs"));
        vm.push_frame_at(Prototype(1), 7);
        vm.push_frame(Prototype(2));

        let mut table = SymbolTable::new();
        let symbol = table.resolve(&vm, 0, Prototype(2));
        assert_eq!(symbol.name, "pairs");
        assert_eq!(symbol.source, "m.lua");
        assert_eq!(symbol.line, 7);
    }

    #[test]
    fn native_frame_walks_past_other_native_frames_to_find_the_script_caller() {
        let mut vm = TestVm::new();
        vm.register_function(
            Prototype(1),
            DebugInfo::script(Some("outer".to_string()), "m.lua", 1),
        );
        vm.register_function(Prototype(2), DebugInfo::native("pcall"));
        vm.register_function(Prototype(3), DebugInfo::native("pairs"));
        vm.push_frame_at(Prototype(1), 12);
        vm.push_frame(Prototype(2));
        vm.push_frame(Prototype(3));

        let mut table = SymbolTable::new();
        let symbol = table.resolve(&vm, 0, Prototype(3));
        assert_eq!(symbol.source, "m.lua");
        assert_eq!(symbol.line, 12);
    }

    #[test]
    fn native_frame_with_no_enclosing_script_frame_falls_back_to_bracket_c() {
        let mut vm = TestVm::new();
        vm.register_function(Prototype(1), DebugInfo::native("pairs"));
        vm.push_frame(Prototype(1));

        let mut table = SymbolTable::new();
        let symbol = table.resolve(&vm, 0, Prototype(1));
        assert_eq!(symbol.source, "=[C]");
        assert_eq!(symbol.line, 0);
    }
}
