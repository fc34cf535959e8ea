//! Error types for the AwWasm sandbox.

use thiserror::Error;

use crate::values::{AwwasmExternKind, AwwasmRefType, AwwasmValueType};

/// Runtime trap - an unrecoverable fault during execution or during
/// evaluation of a constant initializer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AwwasmTrap {
    /// Memory access out of bounds
    #[error("out of bounds memory access: offset={offset}, len={len}, bound={bound}")]
    MemoryOutOfBounds { offset: u64, len: u64, bound: u64 },
    /// Table access out of bounds
    #[error("out of bounds table access: offset={offset}, len={len}, bound={bound}")]
    TableOutOfBounds { offset: u64, len: u64, bound: u64 },
    /// Indirect call through a table slot holding a null reference
    #[error("uninitialized element {0}")]
    UninitializedElement(u32),
    /// Reference of the wrong type for the table it is stored in
    #[error("reference type mismatch: table holds {expected}, got {got}")]
    RefTypeMismatch {
        expected: AwwasmRefType,
        got: AwwasmRefType,
    },
    /// Indirect call type mismatch
    #[error("indirect call type mismatch")]
    IndirectCallTypeMismatch,
    /// Unreachable instruction executed
    #[error("unreachable")]
    Unreachable,
    /// Execution stopped by the interrupt handle
    #[error("execution interrupted")]
    Interrupted,
    /// A host function reported a failure
    #[error("host function failed: {0}")]
    Host(String),
    /// A wasm function was invoked but no engine is attached to the store
    #[error("no execution engine attached for wasm function")]
    NoEngine,
    /// `global.get` of a global the initializer cannot see
    #[error("global index {0} out of range in constant expression")]
    GlobalIndexOutOfRange(u32),
    /// `ref.func` of a function the module does not have
    #[error("function index {0} out of range in constant expression")]
    FuncIndexOutOfRange(u32),
    /// Operand types of a constant expression do not line up
    #[error("constant expression type mismatch: expected {expected}, got {got}")]
    ConstExprTypeMismatch {
        expected: AwwasmValueType,
        got: AwwasmValueType,
    },
    /// Constant expression left zero or several values on its stack
    #[error("constant expression must produce exactly one value, produced {0}")]
    ConstExprArity(usize),
}

/// Failure to allocate a memory or table instance.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AwwasmAllocationError {
    /// The requested size is above the engine-imposed cap.
    #[error("requested {requested} exceeds the engine limit of {limit}")]
    ExceedsEngineLimit { requested: u64, limit: u64 },
    /// The declared minimum is above the declared maximum.
    #[error("minimum {min} exceeds maximum {max}")]
    MinExceedsMax { min: u64, max: u64 },
    /// The host could not provide the backing storage.
    #[error("host allocation of {bytes} bytes failed")]
    OutOfMemory { bytes: u64 },
}

/// Which part of an import descriptor failed to match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AwwasmMismatchCategory {
    /// Different external kind (e.g. a memory where a function was expected).
    ExternalType,
    /// Function signatures differ.
    FunctionType,
    /// Table element type or limits are incompatible.
    Table,
    /// Memory limits are incompatible.
    Memory,
    /// Global value type or mutability differ.
    Global,
    /// Version mismatch of a host binding.
    Version,
}

/// Detailed description of an import type mismatch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{category:?} mismatch: expected {expected}, actual {actual}")]
pub struct AwwasmMismatch {
    pub category: AwwasmMismatchCategory,
    pub expected: String,
    pub actual: String,
}

impl AwwasmMismatch {
    pub fn new(category: AwwasmMismatchCategory, expected: impl ToString, actual: impl ToString) -> Self {
        Self {
            category,
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

/// Errors that can occur during module instantiation.
///
/// Every variant is fatal to the instantiation attempt that raised it and
/// to nothing else: the partially built instance is rolled back first.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AwwasmInstantiationError {
    /// Import not found among registered modules and host bindings
    #[error("unknown import {module}.{name} ({kind})")]
    UnknownImport {
        module: String,
        name: String,
        kind: AwwasmExternKind,
    },
    /// Import found but its type does not satisfy the requirement
    #[error("incompatible import type for {module}.{name}: {mismatch}")]
    IncompatibleImportType {
        module: String,
        name: String,
        #[source]
        mismatch: AwwasmMismatch,
    },
    /// Memory or table allocation failed
    #[error("allocation of {kind} {index} failed: {source}")]
    AllocationFailed {
        kind: AwwasmExternKind,
        index: u32,
        #[source]
        source: AwwasmAllocationError,
    },
    /// Active element segment does not fit its table
    #[error("element segment {segment} does not fit: offset={offset}, len={len}, table_size={table_size}")]
    ElementSegmentDoesNotFit {
        segment: u32,
        offset: u64,
        len: u64,
        table_size: u64,
    },
    /// Active data segment does not fit its memory
    #[error("data segment {segment} does not fit: offset={offset}, len={len}, memory_size={memory_size}")]
    DataSegmentDoesNotFit {
        segment: u32,
        offset: u64,
        len: u64,
        memory_size: u64,
    },
    /// A constant initializer trapped
    #[error("initializer trapped: {0}")]
    InitializerTrapped(#[source] AwwasmTrap),
    /// Start function trapped
    #[error("start function trapped: {0}")]
    StartFunctionTrapped(#[source] AwwasmTrap),
    /// The requested registration name is taken
    #[error("module name conflict: {0}")]
    ModuleNameConflict(String),
    /// The module descriptor references an entity it does not declare
    #[error("invalid module: {0}")]
    InvalidModule(String),
}

/// Errors reported by store registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AwwasmStoreError {
    #[error("module name conflict: {0}")]
    ModuleNameConflict(String),
    #[error("unknown module: {0}")]
    UnknownModule(String),
    /// The instance is already bound to another name
    #[error("module is already registered as {0}")]
    AlreadyRegistered(String),
    /// Another live instance still imports from this one
    #[error("module {name} is still imported by {importer}")]
    ModuleInUse { name: String, importer: String },
}

impl From<AwwasmStoreError> for AwwasmInstantiationError {
    fn from(err: AwwasmStoreError) -> Self {
        match err {
            AwwasmStoreError::ModuleNameConflict(name) => AwwasmInstantiationError::ModuleNameConflict(name),
            other => AwwasmInstantiationError::InvalidModule(other.to_string()),
        }
    }
}

/// Errors that can occur while accessing runtime state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AwwasmRuntimeError {
    /// A trap occurred
    #[error("trap: {0}")]
    Trap(#[from] AwwasmTrap),
    /// Invalid function address
    #[error("invalid function address: {0}")]
    InvalidFuncAddr(u32),
    /// Invalid memory address
    #[error("invalid memory address: {0}")]
    InvalidMemAddr(u32),
    /// Invalid table address
    #[error("invalid table address: {0}")]
    InvalidTableAddr(u32),
    /// Invalid global address
    #[error("invalid global address: {0}")]
    InvalidGlobalAddr(u32),
    /// Invalid element segment address
    #[error("invalid element address: {0}")]
    InvalidElemAddr(u32),
    /// Invalid data segment address
    #[error("invalid data address: {0}")]
    InvalidDataAddr(u32),
    /// Invalid or recycled module address
    #[error("invalid module address: {0}")]
    InvalidModuleAddr(u32),
    /// Export missing or of a different kind
    #[error("unknown export {name} ({kind})")]
    UnknownExport { name: String, kind: AwwasmExternKind },
    /// Value does not have the global's declared type
    #[error("type mismatch: expected {expected}, got {got}")]
    TypeMismatch {
        expected: AwwasmValueType,
        got: AwwasmValueType,
    },
    /// Wrong number of call arguments
    #[error("arity mismatch: expected {expected} arguments, got {got}")]
    ArityMismatch { expected: usize, got: usize },
    /// A callee returned values that do not match its signature
    #[error("result mismatch: signature declares {expected:?}, function returned {got:?}")]
    ResultMismatch {
        expected: Vec<AwwasmValueType>,
        got: Vec<AwwasmValueType>,
    },
    /// Global is immutable
    #[error("global is immutable")]
    ImmutableGlobal,
}
