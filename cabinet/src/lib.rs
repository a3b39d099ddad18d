mod arena;
mod atomic;
mod bytes;
mod cabinet;
mod codec;
mod config;
mod drawer;
mod error;
mod gc;
mod header;
mod lease;
mod object;
mod ptr;
mod queue;
mod roots;
mod snapshot;
mod swap;

pub use arena::Arena;
pub use cabinet::{Cabinet, CabinetShared, CabinetStats, DrawerInfo};
pub use config::CabinetSettings;
pub use drawer::{Drawer, Residency, Tray};
pub use error::{LeaseError, MemoryError, Result, corruption};
pub use gc::GcReport;
pub use header::{Header, ObjectType};
pub use lease::Lease;
pub use object::{Closure, CompiledFunction, Module, Object, Resource, Schema, Struct, Upvalue};
pub use ptr::{Ptr, align8};
pub use queue::LockFreeQueue;
pub use roots::{RootProvider, RootSet};
pub use swap::SwapFile;
