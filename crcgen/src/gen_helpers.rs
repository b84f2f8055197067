//! Emitter context and lazily emitted helper inlines.
//!
//! The [`Emitter`] owns the output buffer tree and every piece of "already
//! emitted" bookkeeping, so that one process can run any number of
//! independent generations. Helpers are emitted on first use, in first-use
//! order, into the region of the output that precedes `crc32_impl`; the
//! `#include` each intrinsic family needs goes to a separate buffer at the
//! very top of the file.

use std::cell::Cell;
use std::io::Write;
use std::rc::Rc;

use crate::error::Error;
use crate::isa::Isa;
use crate::poly::{self, Poly};
use crate::srcgen::{BufId, Buffer, SourcePool};

/// Intrinsic headers that may be pulled into the includes buffer.
#[derive(Clone, Copy)]
pub(crate) enum Header {
    ArmAcle,
    ArmNeon,
    Nmmintrin,
    Immintrin,
    Wmmintrin,
}

impl Header {
    fn include_line(self) -> &'static str {
        match self {
            Header::ArmAcle => "#include <arm_acle.h>\n",
            Header::ArmNeon => "#include <arm_neon.h>\n",
            Header::Nmmintrin => "#include <nmmintrin.h>\n",
            Header::Immintrin => "#include <immintrin.h>\n",
            Header::Wmmintrin => "#include <wmmintrin.h>\n",
        }
    }
}

/// Operand half selected by a carry-less multiply wrapper.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum Half {
    Lo,
    Hi,
}

impl Half {
    fn name(self) -> &'static str {
        match self {
            Half::Lo => "lo",
            Half::Hi => "hi",
        }
    }
}

/// Context for one generation run.
pub(crate) struct Emitter {
    pub src: SourcePool,
    pub out: BufId,
    pub includes: BufId,
    pub isa: Isa,
    pub poly: Poly,
    pub scalar_bytes: u32,
    pub vector_bytes: u32,
    /// C spellings of the 1/4/8-byte scalar CRC steps; either the emitted
    /// helper names or hardware intrinsics.
    pub scalar1_fn: &'static str,
    pub scalar4_fn: &'static str,
    pub scalar8_fn: &'static str,
    /// Lookup table planes requested so far; shared with the deferred table
    /// producer, which reads the final count at flush time.
    table_planes: Rc<Cell<u32>>,
    headers_done: u8,
    clmul_done: u16,
    scalar_done: u32,
    clmul_scalar_done: bool,
    crc_shift_done: bool,
}

impl Emitter {
    pub fn new(isa: Isa, poly: Poly) -> Self {
        let mut src = SourcePool::new();
        let out = src.create();
        let includes = src.put_new(out);
        Emitter {
            src,
            out,
            includes,
            isa,
            poly,
            scalar_bytes: isa.scalar_bytes(),
            vector_bytes: isa.vector_bytes(),
            scalar1_fn: "crc_u8",
            scalar4_fn: "crc_u32",
            scalar8_fn: "crc_u64",
            table_planes: Rc::new(Cell::new(0)),
            headers_done: 0,
            clmul_done: 0,
            scalar_done: 0,
            clmul_scalar_done: false,
            crc_shift_done: false,
        }
    }

    /// Reindent and write the finished buffer tree.
    pub fn flush(self, w: &mut dyn Write) -> Result<(), Error> {
        self.src.flush(self.out, w)
    }

    /// The output begins with a comment recording the invocation, so that a
    /// generated file identifies the arguments that produced it.
    pub fn put_provenance(&mut self, invocation: &str) {
        put!(
            self.src[self.includes],
            "/* Generated by crcgen using: */\n/* {} */\n\n",
            invocation
        );
    }

    pub fn need_header(&mut self, header: Header) {
        let bit = 1u8 << header as u8;
        if self.headers_done & bit == 0 {
            self.headers_done |= bit;
            self.src[self.includes].put_str(header.include_line());
        }
    }

    pub fn emit_standard_preprocessor(&mut self) {
        self.src[self.includes]
            .put_str("#include <stddef.h>\n#include <stdint.h>\n");
        self.src[self.out].put_str(
            "\n#if defined(_MSC_VER)\n\
             #define CRC_AINLINE static __forceinline\n\
             #define CRC_ALIGN(n) __declspec(align(n))\n\
             #else\n\
             #define CRC_AINLINE static __inline __attribute__((always_inline))\n\
             #define CRC_ALIGN(n) __attribute__((aligned(n)))\n\
             #endif\n\
             #define CRC_EXPORT extern\n\n",
        );
    }

    /// Pick scalar CRC spellings. CRC-32 has hardware support on aarch64,
    /// CRC-32C on both aarch64 and x86_64; in those cases the scalar
    /// helpers are the intrinsics themselves and nothing is emitted.
    pub fn init_isa(&mut self) {
        if self.poly == poly::CRC32 {
            if self.isa.is_neon() {
                self.need_header(Header::ArmAcle);
                self.scalar1_fn = "__crc32b";
                self.scalar4_fn = "__crc32w";
                self.scalar8_fn = "__crc32d";
                self.need_crc_scalar(15);
            }
        } else if self.poly == poly::CRC32C {
            if self.isa.is_neon() {
                self.need_header(Header::ArmAcle);
                self.scalar1_fn = "__crc32cb";
                self.scalar4_fn = "__crc32cw";
                self.scalar8_fn = "__crc32cd";
                self.need_crc_scalar(15);
            } else if self.isa != Isa::None {
                self.need_header(Header::Nmmintrin);
                self.scalar1_fn = "_mm_crc32_u8";
                self.scalar4_fn = "_mm_crc32_u32";
                self.scalar8_fn = "_mm_crc32_u64";
                self.need_crc_scalar(15);
            }
        }
    }

    /// Request a lookup table with at least `planes` byte planes, emitting
    /// the declaration on first request. The table literal itself is
    /// produced at flush time, once the final plane count is known.
    pub fn need_crc_table(&mut self, planes: u32) -> &'static str {
        let table_var = "g_crc_table";
        if planes > self.table_planes.get() {
            if self.table_planes.get() == 0 {
                log::trace!("emitting CRC lookup table declaration");
                put!(self.src[self.out], "static const uint32_t {}", table_var);
                let poly = self.poly;
                let planes = Rc::clone(&self.table_planes);
                self.src
                    .put_deferred_fn(self.out, move |b| generate_table(b, poly, planes.get()));
            }
            self.table_planes.set(planes);
        }
        table_var
    }

    /// Emit a `clmul_lo`/`clmul_hi` wrapper for `isa` if not already done.
    /// `isa` is usually the target ISA, but the NEON scalar helpers borrow
    /// the plain (unfused) NEON-EOR3 form.
    pub fn need_clmul_fn(&mut self, half: Half, isa: Isa) {
        let mask = 1u16 << (u16::from(half == Half::Lo) + 2 * isa as u16);
        if self.clmul_done & mask != 0 {
            return;
        }
        self.clmul_done |= mask;
        log::trace!("emitting clmul_{} for {}", half.name(), isa);

        let b = self.out;
        let (pmull2, lanes) = match half {
            Half::Lo => ("", 1),
            Half::Hi => ("2", 2),
        };
        match isa {
            Isa::Neon => {
                self.need_header(Header::ArmNeon);
                let vt = self.isa.vector_type();
                put!(
                    self.src[b],
                    "CRC_AINLINE {} clmul_{}_e({} a, {} b, {} c) {{\n",
                    vt,
                    half.name(),
                    vt,
                    vt,
                    vt
                );
                put!(self.src[b], "{} r;\n", vt);
                put!(
                    self.src[b],
                    "__asm(\"pmull{} %0.1q, %2.{}d, %3.{}d\\neor %0.16b, %0.16b, %1.16b\\n\" : \"=w\"(r), \"+w\"(c) : \"w\"(a), \"w\"(b));\n",
                    pmull2,
                    lanes,
                    lanes
                );
                self.src[b].put_str("return r;\n}\n\n");
            }
            Isa::NeonEor3 => {
                self.need_header(Header::ArmNeon);
                let vt = self.isa.vector_type();
                put!(
                    self.src[b],
                    "CRC_AINLINE {} clmul_{}({} a, {} b) {{\n",
                    vt,
                    half.name(),
                    vt,
                    vt
                );
                put!(self.src[b], "{} r;\n", vt);
                put!(
                    self.src[b],
                    "__asm(\"pmull{} %0.1q, %1.{}d, %2.{}d\\n\" : \"=w\"(r) : \"w\"(a), \"w\"(b));\n",
                    pmull2,
                    lanes,
                    lanes
                );
                self.src[b].put_str("return r;\n}\n\n");
            }
            Isa::Sse | Isa::Avx512 => {
                self.need_header(Header::Wmmintrin);
                put!(
                    self.src[b],
                    "#define clmul_{}(a, b) (_mm_clmulepi64_si128((a), (b), {})){}\n",
                    half.name(),
                    if half == Half::Hi { 17 } else { 0 },
                    if half == Half::Hi { "\n" } else { "" }
                );
            }
            Isa::Avx512Vpclmulqdq => {
                self.need_header(Header::Immintrin);
                put!(
                    self.src[b],
                    "#define clmul_{}(a, b) (_mm512_clmulepi64_epi128((a), (b), {})){}\n",
                    half.name(),
                    if half == Half::Hi { 17 } else { 0 },
                    if half == Half::Hi { "\n" } else { "" }
                );
            }
            Isa::None => unreachable!("no carry-less multiply on scalar-only ISA"),
        }
    }

    /// Emit the scalar CRC helper for the given width if not already done.
    /// Width 15 marks every width as present without emitting anything,
    /// used when the scalar steps are hardware instructions.
    pub fn need_crc_scalar(&mut self, size: u32) {
        if self.scalar_done & size != 0 {
            return;
        }
        self.scalar_done |= size;
        if size > 8 {
            return;
        }
        log::trace!("emitting {}-byte scalar CRC helper", size);

        let b = self.src.create();
        if size == 1 {
            let table_var = self.need_crc_table(1);
            put!(
                self.src[b],
                "CRC_AINLINE uint32_t {}(uint32_t crc, uint8_t val) {{\n",
                self.scalar1_fn
            );
            put!(
                self.src[b],
                "return (crc >> 8) ^ {}[0][(crc & 0xFF) ^ val];\n",
                table_var
            );
            self.src[b].put_str("}\n\n");
        } else if size == 4 {
            put!(
                self.src[b],
                "CRC_AINLINE uint32_t {}(uint32_t crc, uint32_t val) {{\n",
                self.scalar4_fn
            );
            if self.isa == Isa::None {
                let table_var = self.need_crc_table(4);
                self.src[b].put_str("crc ^= val;\n");
                put!(
                    self.src[b],
                    "return {}[0][crc >>  24] ^ {}[1][(crc >> 16) & 0xFF] ^\n",
                    table_var,
                    table_var
                );
                put!(
                    self.src[b],
                    "       {}[3][crc & 0xFF] ^ {}[2][(crc >>  8) & 0xFF];\n",
                    table_var,
                    table_var
                );
            } else {
                self.put_scalar_barrett(b, 63, "_mm_cvtsi32_si128");
            }
            self.src[b].put_str("}\n\n");
        } else if size == 8 {
            put!(
                self.src[b],
                "CRC_AINLINE uint32_t {}(uint32_t crc, uint64_t val) {{\n",
                self.scalar8_fn
            );
            if self.isa == Isa::None {
                self.need_crc_scalar(4);
                put!(self.src[b], "crc = {}(crc, (uint32_t)val);\n", self.scalar4_fn);
                put!(
                    self.src[b],
                    "return {}(crc, (uint32_t)(val >> 32));\n",
                    self.scalar4_fn
                );
            } else {
                self.put_scalar_barrett(b, 95, "_mm_cvtsi64_si128");
            }
            self.src[b].put_str("}\n\n");
        }
        self.src.put_child(self.out, b);
    }

    /// Body of a Barrett-reduction scalar helper: fold `crc ^ val` down to
    /// 32 bits with two carry-less multiplies by generation-time constants.
    fn put_scalar_barrett(&mut self, b: BufId, qn: u32, cvt: &str) {
        let q = self.poly.xndivp(qn);
        let p = self.poly.bits();
        if self.isa.is_neon() {
            self.need_clmul_fn(Half::Lo, Isa::NeonEor3);
            self.src[b].put_str("uint64x2_t a = vmovq_n_u64(crc ^ val);\n");
            put!(
                self.src[b],
                "a = clmul_lo(a, vmovq_n_u64(0x{:08x}{:08x}ull));\n",
                (q >> 32) as u32,
                q as u32
            );
            put!(
                self.src[b],
                "a = clmul_lo(a, vmovq_n_u64(0x{:08x}{:08x}ull));\n",
                p >> 31,
                p.wrapping_mul(2).wrapping_add(1)
            );
            self.src[b]
                .put_str("return vgetq_lane_u32(vreinterpretq_u32_u64(a), 2);\n");
        } else {
            self.need_header(Header::Nmmintrin);
            self.need_header(Header::Wmmintrin);
            put!(
                self.src[b],
                "__m128i k = _mm_setr_epi32(0x{:08x}, 0x{:08x}, 0x{:08x}, {});\n",
                q as u32,
                (q >> 32) as u32,
                p.wrapping_mul(2).wrapping_add(1),
                p >> 31
            );
            put!(self.src[b], "__m128i a = {}(crc ^ val);\n", cvt);
            self.src[b].put_str("__m128i b = _mm_clmulepi64_si128(a, k, 0x00);\n");
            self.src[b].put_str("__m128i c = _mm_clmulepi64_si128(b, k, 0x10);\n");
            self.src[b].put_str("return _mm_extract_epi32(c, 2);\n");
        }
    }

    /// Emit `clmul_scalar`, a 32x32 carry-less multiply returning 128 bits.
    pub fn need_clmul_scalar(&mut self) {
        if self.clmul_scalar_done {
            return;
        }
        self.clmul_scalar_done = true;

        let b = self.out;
        put!(
            self.src[b],
            "CRC_AINLINE {} clmul_scalar(uint32_t a, uint32_t b) {{\n",
            self.isa.vec16_type()
        );
        if self.isa.is_neon() {
            self.need_header(Header::ArmNeon);
            self.src[b].put_str("uint64x2_t r;\n");
            self.src[b].put_str(
                "__asm(\"pmull %0.1q, %1.1d, %2.1d\\n\" : \"=w\"(r) : \"w\"(vmovq_n_u64(a)), \"w\"(vmovq_n_u64(b)));\n",
            );
            self.src[b].put_str("return r;\n");
        } else {
            self.need_header(Header::Wmmintrin);
            self.src[b].put_str(
                "return _mm_clmulepi64_si128(_mm_cvtsi32_si128(a), _mm_cvtsi32_si128(b), 0);\n",
            );
        }
        self.src[b].put_str("}\n\n");
    }

    /// Emit the run-time `crc_shift` helper and the `xnmodp` routine it
    /// needs. Used when a shift distance is only known at run time; the
    /// emitted `xnmodp` leans on the scalar CRC steps to batch 32 zero bits
    /// at a time before the squaring loop.
    pub fn need_crc_shift(&mut self) {
        if self.crc_shift_done {
            return;
        }
        self.crc_shift_done = true;
        self.need_clmul_scalar();
        self.need_crc_scalar(4);
        self.need_crc_scalar(8);

        let b = self.out;
        self.src[b]
            .put_str("static uint32_t xnmodp(uint64_t n) /* x^n mod P, in log(n) time */ {\n");
        self.src[b].put_str("uint64_t stack = ~(uint64_t)1;\n");
        self.src[b].put_str("uint32_t acc, low;\n");
        self.src[b].put_str("for (; n > 191; n = (n >> 1) - 16) {\n");
        self.src[b].put_str("stack = (stack << 1) + (n & 1);\n");
        self.src[b].put_str("}\n");
        self.src[b].put_str("stack = ~stack;\n");
        self.src[b].put_str("acc = ((uint32_t)0x80000000) >> (n & 31);\n");
        self.src[b].put_str("for (n >>= 5; n; --n) {\n");
        put!(self.src[b], "acc = {}(acc, 0);\n", self.scalar4_fn);
        self.src[b].put_str("}\n");
        self.src[b].put_str("while ((low = stack & 1), stack >>= 1) {\n");
        if self.isa.is_neon() {
            self.src[b].put_str("poly8x8_t x = vreinterpret_p8_u64(vmov_n_u64(acc));\n");
            self.src[b].put_str(
                "uint64_t y = vgetq_lane_u64(vreinterpretq_u64_p16(vmull_p8(x, x)), 0);\n",
            );
        } else {
            self.src[b].put_str("__m128i x = _mm_cvtsi32_si128(acc);\n");
            self.src[b]
                .put_str("uint64_t y = _mm_cvtsi128_si64(_mm_clmulepi64_si128(x, x, 0));\n");
        }
        put!(self.src[b], "acc = {}(0, y << low);\n", self.scalar8_fn);
        self.src[b].put_str("}\n");
        self.src[b].put_str("return acc;\n");
        self.src[b].put_str("}\n\n");

        put!(
            self.src[b],
            "CRC_AINLINE {} crc_shift(uint32_t crc, size_t nbytes) {{\n",
            self.isa.vec16_type()
        );
        self.src[b].put_str("return clmul_scalar(crc, xnmodp(nbytes * 8 - 33));\n");
        self.src[b].put_str("}\n\n");
    }
}

/// Produce the lookup table literal: one 256-entry plane per byte of the
/// widest table-driven step requested during emission.
fn generate_table(b: &mut Buffer, poly: Poly, planes: u32) {
    put!(b, "[{}][256] = {{", planes);
    for i in 0..planes {
        b.put_str("{\n");
        for j in 0..256u32 {
            let mut crc = j;
            for _ in 0..(i + 1) * 8 {
                crc = (crc >> 1) ^ ((crc & 1) * poly.bits());
            }
            let sep = if j == 255 {
                ""
            } else if (j + 1) % 6 != 0 {
                ", "
            } else {
                ",\n"
            };
            put!(b, "0x{:08x}{}", crc, sep);
        }
        if i + 1 < planes {
            b.put_str("},");
        } else {
            b.put_str("\n}};\n\n");
        }
    }
}
