//! Pendragon: assembler and virtual machine core for a 16-bit
//! register architecture (spec §1, §2).
//!
//! Five components, each owning one module, built bottom-up: the binary
//! image codec and paged virtual memory and frame-disciplined stack have
//! no dependencies on each other; the assembler pipeline turns source
//! text into the same binary shape the codec reads and writes; the CPU
//! drives the assembled code over the memory and stack primitives. This
//! crate is a library only — it has no `main`, no argv parsing, and no
//! file I/O beyond the byte-buffer-in, byte-buffer-out shape of
//! [`image::read`]/[`image::write`]. An `asm`/`lvm` front end is an
//! external collaborator that links against this crate.

pub mod asm;
pub mod cpu;
pub mod error;
pub mod image;
pub mod memory;
pub mod stack;
