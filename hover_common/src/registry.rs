//! Named variable registry for parameters and log channels.
//!
//! Producers register typed [`VarCell`]s under `group.name` paths and keep
//! their own clone of each cell. Every cell is a single 32-bit atomic, so the
//! producer publishes a value with one store and readers (introspection,
//! telemetry downlink) never see a torn value and never take a lock on the
//! hot path. The name map itself is only locked by `register`/`read`/`write`
//! calls, which happen outside the RT cycle.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::RwLock;
use thiserror::Error;

// ─── Value Types ────────────────────────────────────────────────────

/// Wire type of a registered variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VarType {
    U8,
    U32,
    F32,
}

impl fmt::Display for VarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::U8 => write!(f, "uint8"),
            Self::U32 => write!(f, "uint32"),
            Self::F32 => write!(f, "float"),
        }
    }
}

/// Who may write a variable through the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VarAccess {
    /// Log channel: only the producer updates it.
    ReadOnly,
    /// Parameter: operators may write it.
    ReadWrite,
}

/// A typed variable value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VarValue {
    U8(u8),
    U32(u32),
    F32(f32),
}

impl VarValue {
    pub const fn ty(&self) -> VarType {
        match self {
            Self::U8(_) => VarType::U8,
            Self::U32(_) => VarType::U32,
            Self::F32(_) => VarType::F32,
        }
    }

    const fn to_bits(self) -> u32 {
        match self {
            Self::U8(v) => v as u32,
            Self::U32(v) => v,
            Self::F32(v) => v.to_bits(),
        }
    }

    const fn from_bits(ty: VarType, bits: u32) -> Self {
        match ty {
            VarType::U8 => Self::U8(bits as u8),
            VarType::U32 => Self::U32(bits),
            VarType::F32 => Self::F32(f32::from_bits(bits)),
        }
    }
}

// ─── Errors ─────────────────────────────────────────────────────────

/// Registry misuse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A variable is already registered under this path.
    #[error("variable '{0}' already registered")]
    Duplicate(String),

    /// No variable registered under this path.
    #[error("variable '{0}' not found")]
    NotFound(String),

    /// Attempt to write a read-only variable.
    #[error("variable '{0}' is read-only")]
    ReadOnly(String),

    /// Value type does not match the registered type.
    #[error("variable '{path}' is {expected}, got {actual}")]
    TypeMismatch {
        path: String,
        expected: VarType,
        actual: VarType,
    },

    /// Group or name is empty or contains a '.'.
    #[error("invalid variable path '{group}.{name}'")]
    InvalidName { group: String, name: String },
}

// ─── VarCell ────────────────────────────────────────────────────────

/// Shared, lock-free storage for one registered variable.
///
/// Cloning a cell shares the underlying atomic.
#[derive(Debug, Clone)]
pub struct VarCell {
    ty: VarType,
    bits: Arc<AtomicU32>,
}

impl VarCell {
    fn with(value: VarValue) -> Self {
        Self {
            ty: value.ty(),
            bits: Arc::new(AtomicU32::new(value.to_bits())),
        }
    }

    pub fn new_u8(v: u8) -> Self {
        Self::with(VarValue::U8(v))
    }

    pub fn new_u32(v: u32) -> Self {
        Self::with(VarValue::U32(v))
    }

    pub fn new_f32(v: f32) -> Self {
        Self::with(VarValue::F32(v))
    }

    #[inline]
    pub const fn ty(&self) -> VarType {
        self.ty
    }

    #[inline]
    pub fn load(&self) -> VarValue {
        VarValue::from_bits(self.ty, self.bits.load(Ordering::Acquire))
    }

    /// Store a value of the cell's type.
    pub fn store(&self, value: VarValue) -> Result<(), VarType> {
        if value.ty() != self.ty {
            return Err(self.ty);
        }
        self.bits.store(value.to_bits(), Ordering::Release);
        Ok(())
    }

    // Typed fast paths for the producer side. The producer owns the cell's
    // type, so a mismatch here is a programming error caught in debug builds.

    #[inline]
    pub fn get_u8(&self) -> u8 {
        debug_assert_eq!(self.ty, VarType::U8);
        self.bits.load(Ordering::Acquire) as u8
    }

    #[inline]
    pub fn set_u8(&self, v: u8) {
        debug_assert_eq!(self.ty, VarType::U8);
        self.bits.store(v as u32, Ordering::Release);
    }

    #[inline]
    pub fn get_u32(&self) -> u32 {
        debug_assert_eq!(self.ty, VarType::U32);
        self.bits.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_u32(&self, v: u32) {
        debug_assert_eq!(self.ty, VarType::U32);
        self.bits.store(v, Ordering::Release);
    }

    #[inline]
    pub fn get_f32(&self) -> f32 {
        debug_assert_eq!(self.ty, VarType::F32);
        f32::from_bits(self.bits.load(Ordering::Acquire))
    }

    #[inline]
    pub fn set_f32(&self, v: f32) {
        debug_assert_eq!(self.ty, VarType::F32);
        self.bits.store(v.to_bits(), Ordering::Release);
    }
}

// ─── Registry Contract ──────────────────────────────────────────────

/// Registration side of the parameter/logging subsystem.
pub trait VarRegistry: Send + Sync {
    /// Register `cell` under `group.name`.
    fn register(
        &self,
        group: &str,
        name: &str,
        access: VarAccess,
        cell: VarCell,
    ) -> Result<(), RegistryError>;
}

#[derive(Debug, Clone)]
struct Entry {
    access: VarAccess,
    cell: VarCell,
}

/// In-process registry used by the binary and by tests.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered variables.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.read().contains_key(path)
    }

    /// Sorted list of registered paths.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.entries.read().keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn access(&self, path: &str) -> Result<VarAccess, RegistryError> {
        self.entries
            .read()
            .get(path)
            .map(|e| e.access)
            .ok_or_else(|| RegistryError::NotFound(path.to_string()))
    }

    /// Read the current value of `path`.
    pub fn read(&self, path: &str) -> Result<VarValue, RegistryError> {
        self.entries
            .read()
            .get(path)
            .map(|e| e.cell.load())
            .ok_or_else(|| RegistryError::NotFound(path.to_string()))
    }

    /// Operator write. Only `ReadWrite` variables accept writes.
    pub fn write(&self, path: &str, value: VarValue) -> Result<(), RegistryError> {
        let entries = self.entries.read();
        let entry = entries
            .get(path)
            .ok_or_else(|| RegistryError::NotFound(path.to_string()))?;
        if entry.access == VarAccess::ReadOnly {
            return Err(RegistryError::ReadOnly(path.to_string()));
        }
        entry
            .cell
            .store(value)
            .map_err(|expected| RegistryError::TypeMismatch {
                path: path.to_string(),
                expected,
                actual: value.ty(),
            })?;
        tracing::debug!(path, ?value, "parameter written");
        Ok(())
    }
}

fn is_valid_segment(s: &str) -> bool {
    !s.is_empty() && !s.contains('.')
}

impl VarRegistry for MemoryRegistry {
    fn register(
        &self,
        group: &str,
        name: &str,
        access: VarAccess,
        cell: VarCell,
    ) -> Result<(), RegistryError> {
        if !is_valid_segment(group) || !is_valid_segment(name) {
            return Err(RegistryError::InvalidName {
                group: group.to_string(),
                name: name.to_string(),
            });
        }
        let path = format!("{group}.{name}");
        let mut entries = self.entries.write();
        if entries.contains_key(&path) {
            return Err(RegistryError::Duplicate(path));
        }
        entries.insert(path, Entry { access, cell });
        Ok(())
    }
}

impl<R: VarRegistry + ?Sized> VarRegistry for Arc<R> {
    fn register(
        &self,
        group: &str,
        name: &str,
        access: VarAccess,
        cell: VarCell,
    ) -> Result<(), RegistryError> {
        (**self).register(group, name, access, cell)
    }
}
