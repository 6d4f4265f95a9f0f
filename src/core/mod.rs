pub mod intmap;
pub mod strmap;
pub mod types;

pub use intmap::IntMap;
pub use strmap::StrMap;
pub use types::{Prototype, SymbolInfo};
