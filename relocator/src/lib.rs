//! malwi-relocator: ARM64 prologue relocation for malwi function hooks.
//!
//! Before a hook overwrites the first bytes of a function with a redirect,
//! those instructions are moved to a trampoline. Instructions that compute
//! addresses from their own PC (ADR/ADRP) are rewritten into absolute loads;
//! everything else is copied verbatim.

pub mod arch;
pub mod code;
pub mod config;
pub mod types;

// Re-exports for convenience (flattened imports)
pub use arch::arm64::insn::{AdrKind, Arm64Insn, InsnKind};
pub use arch::arm64::relocator::{can_relocate, relocate, try_relocate, Arm64Relocator};
pub use arch::arm64::writer::{Arm64Writer, CodeBackend, Reg};
pub use code::input::InputCode;
pub use config::RelocatorConfig;
pub use types::RelocateError;
