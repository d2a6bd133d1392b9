pub mod insn;
pub mod relocator;
pub mod window;
pub mod writer;
