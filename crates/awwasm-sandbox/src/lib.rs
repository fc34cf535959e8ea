//! AwWasm Sandbox - instance model and instantiation protocol
//!
//! This crate turns validated WebAssembly module descriptors into live,
//! sandboxed module instances: bounds-checked linear memories and tables,
//! typed globals, import resolution against a store of named instances,
//! and an all-or-nothing instantiation pipeline. Executing function bodies
//! is left to an [`AwwasmEngine`] plugged into the store.
//!
//! # Features
//!
//! - `parallel`: Enable Rayon-based instantiation of independent modules
//!   in isolated stores

pub mod config;
pub mod const_expr;
pub mod engine;
pub mod error;
pub mod func;
pub mod global;
pub mod imports;
pub mod instance;
pub mod instantiate;
pub mod memory;
pub mod module;
#[cfg(feature = "parallel")]
pub mod parallel;
pub mod resolve;
pub mod store;
pub mod table;
pub mod values;

// Re-export key types
pub use config::AwwasmConfig;
pub use engine::{AwwasmCaller, AwwasmEngine, AwwasmInterruptHandle};
pub use error::{
    AwwasmAllocationError, AwwasmInstantiationError, AwwasmMismatch, AwwasmMismatchCategory, AwwasmRuntimeError,
    AwwasmStoreError, AwwasmTrap,
};
pub use imports::AwwasmImports;
pub use instance::AwwasmModuleInst;
pub use instantiate::AwwasmInstantiationPhase;
pub use module::AwwasmModule;
pub use resolve::{AwwasmExternType, AwwasmImportResolver};
pub use store::AwwasmStore;
pub use values::{
    AwwasmDataAddr, AwwasmElemAddr, AwwasmExternAddr, AwwasmExternHandle, AwwasmFuncAddr, AwwasmGlobalAddr,
    AwwasmMemAddr, AwwasmModuleAddr, AwwasmRef, AwwasmTableAddr, AwwasmValue,
};
