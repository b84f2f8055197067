//! Generator of hand-tuned C CRC32 kernels.
//!
//! Given an instruction-set family, a reversed 32-bit CRC polynomial and an
//! algorithm descriptor, [`generate`] produces a self-contained C
//! translation unit exporting
//! `uint32_t crc32_impl(uint32_t crc, const char* buf, size_t len)`.
//!
//! The emitted function computes the standard reflected CRC — the same
//! value as `(crc >> 8) ^ table[(crc ^ byte) & 0xFF]` repeated over the
//! buffer — but structured according to the descriptor: some number of
//! carry-less-multiply vector folding streams and hardware/Barrett scalar
//! streams per phase, optionally grouped into fixed-size outer kernels.

#[macro_use]
mod srcgen;

pub mod algo;
pub mod error;
pub mod isa;
pub mod poly;

mod gen_helpers;
mod gen_kernel;

use std::io::Write;

use crate::algo::Algorithm;
use crate::error::Error;
use crate::gen_helpers::Emitter;
use crate::isa::Isa;
use crate::poly::Poly;

/// Generate the C translation unit for one request, writing it to `w`.
///
/// `invocation` is recorded verbatim in the provenance comment at the top
/// of the output; two runs with identical arguments produce byte-identical
/// files. Nothing is written until emission has fully succeeded.
pub fn generate(
    isa: Isa,
    poly: Poly,
    algo: &Algorithm,
    invocation: &str,
    w: &mut dyn Write,
) -> Result<(), Error> {
    let mut emitter = Emitter::new(isa, poly);
    emitter.put_provenance(invocation);
    emitter.emit_standard_preprocessor();
    emitter.init_isa();
    emitter.emit_main_fn(algo);
    emitter.flush(w)
}
