//! Emission of the exported `crc32_impl` function.
//!
//! Each algorithm phase becomes one loop level: an optional realignment
//! step, a guarded block holding the vector/scalar main loop, the
//! accumulator merging that follows it, and a tail that restores the
//! invariants the next phase expects. The final mop-up loops handle
//! whatever the phases left behind. Every folding constant is computed
//! from the active polynomial at generation time.

use crate::algo::{AlgoPhase, Algorithm};
use crate::gen_helpers::{Emitter, Half, Header};
use crate::isa::Isa;
use crate::srcgen::BufId;

impl Emitter {
    /// Emit `crc{acc} = <scalar step>(crc{acc}, *(const uN*)` up to but not
    /// including the address expression.
    fn put_scalar_step_open(&mut self, b: BufId, acc: u32, size: u32) {
        self.need_crc_scalar(size);
        let (step, ty) = match size {
            8 => (self.scalar8_fn, "uint64_t"),
            4 => (self.scalar4_fn, "uint32_t"),
            1 => (self.scalar1_fn, "uint8_t"),
            _ => unreachable!("bad scalar width {size}"),
        };
        put!(self.src[b], "crc{} = {}(crc{}, *(const {}*)", acc, step, acc, ty);
    }

    /// Emit an unaligned vector load of `base + offset`.
    fn put_vector_load(&mut self, b: BufId, base: &str, offset: u32) {
        let load = match self.isa {
            Isa::Neon | Isa::NeonEor3 => "vld1q_u64((const uint64_t*)",
            Isa::Sse | Isa::Avx512 => "_mm_loadu_si128((const __m128i*)",
            Isa::Avx512Vpclmulqdq => "_mm512_loadu_si512((const void*)",
            Isa::None => unreachable!("no vector loads on scalar-only ISA"),
        };
        self.src[b].put_str(load);
        if offset != 0 {
            put!(self.src[b], "({} + {})", base, offset);
        } else {
            self.src[b].put_str(base);
        }
        self.src[b].put_str(")");
    }

    /// Emit `lhs * rhs` with the trivial factors folded away.
    fn put_product(&mut self, b: BufId, lhs: &str, rhs: u32) {
        if rhs == 0 {
            self.src[b].put_str("0");
        } else {
            self.src[b].put_str(lhs);
            if rhs > 1 {
                put!(self.src[b], " * {}", rhs);
            }
        }
    }

    /// XOR `vc{lo}` .. `vc{hi-1}` together, using the three-way XOR where
    /// the ISA has one.
    fn put_vc_xor_tree(&mut self, b: BufId, lo: u32, hi: u32) {
        let range = hi - lo;
        if range == 1 {
            put!(self.src[b], "vc{}", lo);
        } else if range >= 3 && self.isa.has_eor3() {
            let m1 = lo + range / 3;
            let m2 = hi - range / 3;
            if self.isa == Isa::NeonEor3 {
                self.src[b].put_str("veor3q_u64(");
            } else {
                self.need_header(Header::Immintrin);
                self.src[b].put_str("_mm_ternarylogic_epi64(");
            }
            self.put_vc_xor_tree(b, lo, m1);
            self.src[b].put_str(", ");
            self.put_vc_xor_tree(b, m1, m2);
            self.src[b].put_str(", ");
            self.put_vc_xor_tree(b, m2, hi);
            if self.isa != Isa::NeonEor3 {
                self.src[b].put_str(", 0x96");
            }
            self.src[b].put_str(")");
        } else {
            let mid = lo + range / 2;
            if self.isa.is_neon() {
                self.src[b].put_str("veorq_u64(");
            } else {
                self.src[b].put_str("_mm_xor_si128(");
            }
            self.put_vc_xor_tree(b, lo, mid);
            self.src[b].put_str(", ");
            self.put_vc_xor_tree(b, mid, hi);
            self.src[b].put_str(")");
        }
    }

    /// Load `k` with the folding constants for a span of `k` vectors:
    /// `x^(k*vw*8+32-1) mod P` in lane 0 and `x^(k*vw*8-32-1) mod P` in
    /// lane 1, broadcast across the register on wide vectors.
    fn put_vector_set_k(&mut self, b: BufId, k: u32) {
        let span = u64::from(k) * u64::from(self.vector_bytes) * 8;
        let k1 = self.poly.xnmodp(span + 32 - 1);
        let k2 = self.poly.xnmodp(span - 32 - 1);
        if self.isa.is_neon() {
            put!(
                self.src[b],
                "{{ static const uint64_t CRC_ALIGN(16) k_[] = {{0x{:08x}, 0x{:08x}}}; ",
                k1,
                k2
            );
            self.src[b].put_str("k = vld1q_u64(k_); }\n");
        } else {
            self.src[b].put_str("k = ");
            if self.vector_bytes > 16 {
                self.src[b].put_str("_mm512_broadcast_i32x4(");
            }
            put!(self.src[b], "_mm_setr_epi32(0x{:08x}, 0, 0x{:08x}, 0)", k1, k2);
            if self.vector_bytes > 16 {
                self.src[b].put_str(")");
            }
            self.src[b].put_str(";\n");
        }
    }

    /// Fold the 32-bit `scalar` into lane 0 of `vector`.
    fn put_xor_scalar_into_vector(&mut self, b: BufId, scalar: &str, vector: &str) {
        match self.isa {
            Isa::Neon | Isa::NeonEor3 => {
                put!(
                    self.src[b],
                    "{0} = veorq_u64((uint64x2_t){{{1}, 0}}, {0});\n",
                    vector,
                    scalar
                );
            }
            Isa::Sse | Isa::Avx512 => {
                put!(
                    self.src[b],
                    "{0} = _mm_xor_si128(_mm_cvtsi32_si128({1}), {0});\n",
                    vector,
                    scalar
                );
            }
            Isa::Avx512Vpclmulqdq => {
                put!(
                    self.src[b],
                    "{0} = _mm512_xor_si512(_mm512_castsi128_si512(_mm_cvtsi32_si128({1})), {0});\n",
                    vector,
                    scalar
                );
            }
            Isa::None => unreachable!("no vector accumulators on scalar-only ISA"),
        }
    }

    /// Emit `x{reg} = x{reg} * k + addend` in two parts, the carry-less
    /// multiply pair to `p1` and the combining XOR to `p2`; splitting the
    /// parts across buffers groups the multiplies of one block together.
    /// A single-character `addend` names a register family (`x{offset}`),
    /// anything longer is a load base pointer.
    fn put_vector_fma(&mut self, p1: BufId, p2: BufId, reg: u32, addend: &str, offset: u32) {
        self.need_clmul_fn(Half::Lo, self.isa);
        self.need_clmul_fn(Half::Hi, self.isa);
        if self.isa != Isa::Neon {
            put!(
                self.src[p1],
                "y{0} = clmul_lo(x{0}, k), x{0} = clmul_hi(x{0}, k);\n",
                reg
            );
        }
        match self.isa {
            Isa::Neon => put!(self.src[p2], "y{0} = clmul_lo_e(x{0}, k, ", reg),
            Isa::NeonEor3 => put!(self.src[p2], "x{0} = veor3q_u64(x{0}, y{0}, ", reg),
            Isa::Sse => put!(self.src[p2], "y{0} = _mm_xor_si128(y{0}, ", reg),
            Isa::Avx512 => put!(self.src[p2], "x{0} = _mm_ternarylogic_epi64(x{0}, y{0}, ", reg),
            Isa::Avx512Vpclmulqdq => put!(
                self.src[p2],
                "x{0} = _mm512_ternarylogic_epi64(x{0}, y{0}, ",
                reg
            ),
            Isa::None => unreachable!("no vector folds on scalar-only ISA"),
        }
        if addend.len() > 1 {
            self.put_vector_load(p2, addend, offset);
        } else {
            put!(self.src[p2], "{}{}", addend, offset);
        }
        match self.isa {
            Isa::Neon => put!(self.src[p2], "), x{0} = clmul_hi_e(x{0}, k, y{0});\n", reg),
            Isa::NeonEor3 => self.src[p2].put_str(");\n"),
            Isa::Sse => put!(self.src[p2], "), x{0} = _mm_xor_si128(x{0}, y{0});\n", reg),
            Isa::Avx512 | Isa::Avx512Vpclmulqdq => {
                self.src[p2].put_str(", 0x96);\n");
                self.need_header(Header::Immintrin);
            }
            Isa::None => unreachable!(),
        }
    }

    /// One round of the interleaved scalar streams: `s_load / s_acc` steps
    /// into each accumulator, each stream `klen` bytes apart.
    fn put_scalar_main(&mut self, b: BufId, ap: &AlgoPhase) {
        let mut i = 0;
        while i < ap.s_load {
            for j in 0..ap.s_acc {
                self.put_scalar_step_open(b, j, self.scalar_bytes);
                if i != 0 || j != 0 {
                    self.src[b].put_str("(");
                }
                self.src[b].put_str("buf");
                if j != 0 {
                    self.src[b].put_str(" + ");
                    self.put_product(b, "klen", j);
                }
                if i != 0 {
                    put!(self.src[b], " + {}", (i / ap.s_acc) * self.scalar_bytes);
                }
                if i != 0 || j != 0 {
                    self.src[b].put_str(")");
                }
                self.src[b].put_str(");\n");
            }
            i += ap.s_acc;
        }
    }

    /// Collapse vector accumulators `x0` .. `x{n-1}` down to `x0` by
    /// merging pairs at doubling spans.
    fn put_vector_tree_reduce(&mut self, b: BufId, mut n: u32) {
        let mut d = 1;
        while n > 1 {
            self.put_vector_set_k(b, d);
            if n & 1 != 0 {
                // Odd count: merge the first pair, then renumber the rest
                // down. The compiler turns the shuffle into nothing.
                self.put_vector_fma(b, b, 0, "x", d);
                n -= 1;
                for i in 1..n {
                    put!(
                        self.src[b],
                        "{}x{} = x{}",
                        if i == 1 { "" } else { ", " },
                        i * d,
                        i * d + d
                    );
                }
                self.src[b].put_str(";\n");
            }
            let p1 = self.src.put_new(b);
            let mut i = 0;
            while i < n {
                self.put_vector_fma(p1, b, i * d, "x", i * d + d);
                i += 2;
            }
            n >>= 1;
            d <<= 1;
        }
    }

    /// Emit the whole `crc32_impl` function into a buffer appended to the
    /// output after whatever helpers emission discovers along the way.
    pub fn emit_main_fn(&mut self, algo: &Algorithm) {
        let b = self.src.create();
        let mut current_alignment = self.scalar_bytes;
        self.src[b].put_str(
            "CRC_EXPORT uint32_t crc32_impl(uint32_t crc0, const char* buf, size_t len) {\n",
        );
        self.src[b].put_str("crc0 = ~crc0;\n");
        if current_alignment > 1 {
            self.need_crc_scalar(1);
            put!(
                self.src[b],
                "for (; len && ((uintptr_t)buf & {}); --len) {{\n",
                current_alignment - 1
            );
            put!(self.src[b], "crc0 = {}(crc0, *buf++);\n", self.scalar1_fn);
            self.src[b].put_str("}\n");
        }
        for ap in &algo.phases {
            self.emit_phase(b, ap, &mut current_alignment);
        }
        put!(
            self.src[b],
            "for (; len >= {0}; buf += {0}, len -= {0}) {{\n",
            self.scalar_bytes
        );
        self.put_scalar_step_open(b, 0, self.scalar_bytes);
        self.src[b].put_str("buf);\n");
        self.src[b].put_str("}\n");
        if self.scalar_bytes > 1 {
            self.need_crc_scalar(1);
            self.src[b].put_str("for (; len; --len) {\n");
            put!(self.src[b], "crc0 = {}(crc0, *buf++);\n", self.scalar1_fn);
            self.src[b].put_str("}\n");
        }
        self.src[b].put_str("return ~crc0;\n");
        self.src[b].put_str("}\n");
        self.src.put_child(self.out, b);
    }

    fn emit_phase(&mut self, b: BufId, ap: &AlgoPhase, current_alignment: &mut u32) {
        // Bring `buf` up to vector alignment with scalar words first. When
        // the vector is exactly two scalar words, one word settles it.
        if ap.v_acc != 0 && self.vector_bytes > *current_alignment {
            *current_alignment = self.vector_bytes;
            put!(
                self.src[b],
                "{} (((uintptr_t)buf & {}) && len >= {}) {{\n",
                if self.vector_bytes == self.scalar_bytes * 2 {
                    "if"
                } else {
                    "while"
                },
                self.vector_bytes - self.scalar_bytes,
                self.scalar_bytes
            );
            self.put_scalar_step_open(b, 0, self.scalar_bytes);
            self.src[b].put_str("buf);\n");
            put!(self.src[b], "buf += {};\n", self.scalar_bytes);
            put!(self.src[b], "len -= {};\n", self.scalar_bytes);
            self.src[b].put_str("}\n");
        }
        if ap.v_load == 0 && ap.s_load <= 1 {
            return;
        }

        // Bytes consumed per iteration of the main loop.
        let block_size = ap.v_load * self.vector_bytes + ap.s_load * self.scalar_bytes;
        // Round the requested kernel down for alignment, then to blocks.
        let kernel_align = if ap.v_load != 0 {
            self.vector_bytes
        } else {
            self.scalar_bytes
        };
        let kernel_ideal = ap.kernel_size / kernel_align * kernel_align;
        let mut kernel_itrs = kernel_ideal / block_size;

        // Bytes consumed after the main loop while merging accumulators.
        let mut scalar_tail = 0;
        if ap.v_load == 0 {
            // Scalars only; one word of tail unless there is nothing to
            // merge.
            if ap.s_acc > 1 {
                scalar_tail = self.scalar_bytes;
            }
        } else if ap.s_load != 0 {
            // Mixed. If the scalar region keeps the vector region aligned,
            // scalars go first and no tail is needed; otherwise the
            // vectors go first and the scalars own the tail.
            let scalar_kernel_bytes = if kernel_itrs != 0 {
                kernel_itrs * ap.s_load * self.scalar_bytes
            } else {
                ap.s_load * self.scalar_bytes
            };
            if scalar_kernel_bytes % self.vector_bytes != 0 {
                scalar_tail = self.scalar_bytes;
            }
        }
        if kernel_itrs != 0 && scalar_tail != 0 {
            kernel_itrs = (kernel_ideal - scalar_tail) / block_size;
            if kernel_itrs != 0 {
                // Extend the tail so the whole kernel stays aligned.
                let excess = (block_size * kernel_itrs + scalar_tail) % kernel_align;
                if excess != 0 {
                    scalar_tail += kernel_align - excess;
                }
            }
        }
        log::debug!(
            "phase {:?}: block_size={} kernel_itrs={} scalar_tail={}",
            ap,
            block_size,
            kernel_itrs,
            scalar_tail
        );

        let per_acc = if ap.s_acc != 0 {
            (ap.s_load / ap.s_acc) * self.scalar_bytes
        } else {
            0
        };
        let vb = self.vector_bytes;
        let first_chunk = u32::from(ap.v_acc != 0);

        if kernel_itrs != 0 {
            put!(
                self.src[b],
                "while (len >= {}) {{\n",
                block_size * kernel_itrs + scalar_tail
            );
            if !ap.use_end_ptr && kernel_itrs != first_chunk {
                put!(self.src[b], "uint32_t kitrs = {};\n", kernel_itrs - first_chunk);
            }
        } else {
            put!(self.src[b], "if (len >= {}) {{\n", block_size + scalar_tail);
        }

        // Declarations collect out of line, at the top of the block.
        let vars = self.src.put_new(b);
        let mut vbuf = "buf";
        if kernel_itrs == 0 && ap.use_end_ptr {
            self.src[vars].put_str("const char* end = buf + len;\n");
        }
        if ap.v_load == 0 && ap.s_acc > 1 {
            if kernel_itrs != 0 {
                put!(self.src[vars], "const size_t klen = {};\n", kernel_itrs * per_acc);
            } else {
                put!(
                    self.src[vars],
                    "size_t klen = ((len - {}) / {}) * {};\n",
                    scalar_tail,
                    block_size,
                    per_acc
                );
            }
            if ap.use_end_ptr {
                put!(self.src[vars], "const char* limit = buf + klen - {};\n", per_acc);
            }
        } else if ap.v_load != 0 && ap.s_acc != 0 {
            vbuf = "buf2";
            if kernel_itrs != 0 {
                put!(self.src[vars], "const size_t blk = {};\n", kernel_itrs);
                if ap.s_acc > 1 || scalar_tail == 0 || ap.use_end_ptr {
                    put!(self.src[vars], "const size_t klen = blk * {};\n", per_acc);
                }
            } else {
                put!(
                    self.src[vars],
                    "size_t blk = (len - {}) / {};\n",
                    scalar_tail,
                    block_size
                );
                put!(self.src[vars], "size_t klen = blk * {};\n", per_acc);
            }
            put!(self.src[vars], "const char* {} = buf + ", vbuf);
            self.put_product(vars, "klen", if scalar_tail != 0 { 0 } else { ap.s_acc });
            self.src[vars].put_str(";\n");
            if ap.use_end_ptr {
                if scalar_tail != 0 {
                    put!(
                        self.src[vars],
                        "const char* limit = buf + blk * {} + klen - {};\n",
                        ap.v_load * vb,
                        per_acc * 2
                    );
                } else {
                    put!(
                        self.src[vars],
                        "const char* limit = buf + klen - {};\n",
                        per_acc * 2
                    );
                }
            }
        } else if ap.use_end_ptr {
            if kernel_itrs != 0 {
                put!(
                    self.src[vars],
                    "const char* limit = buf + {};\n",
                    (kernel_itrs - 1) * block_size
                );
            } else {
                put!(
                    self.src[vars],
                    "const char* limit = buf + len - {};\n",
                    block_size
                );
            }
        }
        // Scalar accumulators initialise to zero; crc0 carries in.
        for i in 1..ap.s_acc {
            put!(self.src[vars], "uint32_t crc{} = 0;\n", i);
        }

        // Vectors do one iteration before the loop to initialise the
        // accumulators.
        if ap.v_acc != 0 {
            self.src[b].put_str("/* First vector chunk. */\n");
        }
        for i in 0..ap.v_acc {
            put!(self.src[b], "{} x{} = ", self.isa.vector_type(), i);
            self.put_vector_load(b, vbuf, i * vb);
            put!(self.src[b], ", y{};\n", i);
        }
        if ap.v_acc != 0 {
            put!(self.src[b], "{} k;\n", self.isa.vector_type());
            self.put_vector_set_k(b, ap.v_acc);
            if ap.s_load == 0 || scalar_tail != 0 {
                self.put_xor_scalar_into_vector(b, "crc0", "x0");
                if scalar_tail != 0 {
                    self.src[b].put_str("crc0 = 0;\n");
                }
            }
            let mut i = ap.v_acc;
            while i < ap.v_load {
                let p1 = self.src.put_new(b);
                for j in 0..ap.v_acc {
                    self.put_vector_fma(p1, b, j, vbuf, (i + j) * vb);
                }
                i += ap.v_acc;
            }
            put!(self.src[b], "{} += {};\n", vbuf, ap.v_load * vb);
            if kernel_itrs == 0 && !ap.use_end_ptr {
                put!(self.src[b], "len -= {};\n", block_size);
            }
            if scalar_tail != 0 {
                put!(self.src[b], "buf += blk * {};\n", ap.v_load * vb);
            }
        }

        // The main loop: `while (cond) { ... }` when vectors make the body
        // worth entering pre-checked, `do { ... } while (cond);` otherwise.
        if kernel_itrs == 0 || kernel_itrs != first_chunk {
            let cond = self.src.create();
            if kernel_itrs != 0 {
                if ap.use_end_ptr {
                    self.src[cond].put_str("while (buf <= limit)");
                } else {
                    self.src[cond].put_str("while (--kitrs)");
                }
            } else if ap.use_end_ptr {
                self.src[cond].put_str("while (buf <= limit)");
            } else {
                put!(self.src[cond], "while (len >= {})", block_size + scalar_tail);
            }
            self.src[b].put_str("/* Main loop. */\n");
            let mut trailing_cond = None;
            if kernel_itrs == 0 && ap.v_load != 0 {
                self.src.put_child(b, cond);
                self.src[b].put_str(" {\n");
            } else {
                trailing_cond = Some(cond);
                self.src[b].put_str("do {\n");
            }
            let mut i = 0;
            while i < ap.v_load {
                let p1 = self.src.put_new(b);
                for j in 0..ap.v_acc {
                    self.put_vector_fma(p1, b, j, vbuf, (i + j) * vb);
                }
                i += ap.v_acc;
            }
            self.put_scalar_main(b, ap);
            if ap.s_load != 0 {
                put!(self.src[b], "buf += {};\n", per_acc);
            }
            if ap.v_load != 0 {
                put!(self.src[b], "{} += {};\n", vbuf, ap.v_load * vb);
            }
            if kernel_itrs == 0 && !ap.use_end_ptr {
                put!(self.src[b], "len -= {};\n", block_size);
            }
            self.src[b].put_str("}");
            if let Some(cond) = trailing_cond {
                self.src[b].put_str(" ");
                self.src.put_child(b, cond);
                self.src[b].put_str(";");
            }
            self.src[b].put_str("\n");
        }

        // Merge the accumulators.
        if ap.v_acc > 1 {
            put!(self.src[b], "/* Reduce x0 ... x{} to just x0. */\n", ap.v_acc - 1);
            self.put_vector_tree_reduce(b, ap.v_acc);
        }
        if ap.s_acc > 1 || (ap.v_load != 0 && ap.s_acc != 0) {
            if ap.v_load != 0 {
                // Vectors ran one chunk before the loop, so the scalars owe
                // one chunk after it.
                self.src[b].put_str("/* Final scalar chunk. */\n");
                self.put_scalar_main(b, ap);
                if scalar_tail != 0 {
                    put!(self.src[b], "buf += {};\n", per_acc);
                }
            }
            // Shift each scalar accumulator by the bytes that follow its
            // region in the kernel.
            for i in 0..ap.s_acc {
                if i + 1 >= ap.s_acc && scalar_tail != 0 {
                    // The last accumulator has nothing after it.
                    break;
                }
                put!(self.src[vars], "{} vc{};\n", self.isa.vec16_type(), i);
                put!(
                    self.src[b],
                    "vc{} = {}(crc{}, ",
                    i,
                    if kernel_itrs != 0 { "clmul_scalar" } else { "crc_shift" },
                    i
                );
                if kernel_itrs != 0 {
                    let mut amount = kernel_itrs * per_acc * (ap.s_acc - 1 - i);
                    amount += if scalar_tail != 0 {
                        scalar_tail
                    } else {
                        kernel_itrs * ap.v_load * vb
                    };
                    put!(
                        self.src[b],
                        "0x{:08x}",
                        self.poly.xnmodp(u64::from(amount) * 8 - 33)
                    );
                    self.need_clmul_scalar();
                } else {
                    self.need_crc_shift();
                    self.put_product(b, "klen", ap.s_acc - 1 - i);
                    if scalar_tail != 0 {
                        put!(self.src[b], " + {}", scalar_tail);
                    } else if ap.v_load != 0 {
                        put!(self.src[b], " + blk * {}", ap.v_load * vb);
                    }
                }
                self.src[b].put_str(");\n");
            }
            self.src[vars].put_str("uint64_t vc;\n");
            if ap.s_acc == u32::from(scalar_tail != 0) {
                self.src[b].put_str("vc = 0;\n");
            } else {
                put!(self.src[b], "vc = {}(", self.isa.vec16_lane8_fn());
                self.put_vc_xor_tree(b, 0, ap.s_acc - u32::from(scalar_tail != 0));
                self.src[b].put_str(", 0);\n");
            }
        }
        if ap.v_load != 0 {
            let mut x0 = "x0";
            if self.isa == Isa::Avx512Vpclmulqdq {
                self.src[b].put_str("/* Reduce 512 bits to 128 bits. */\n");
                self.need_header(Header::Immintrin);
                self.need_clmul_fn(Half::Lo, self.isa);
                self.need_clmul_fn(Half::Hi, self.isa);
                self.src[b].put_str("k = _mm512_setr_epi32(");
                let mut n = 415;
                while n >= 95 {
                    put!(self.src[b], "0x{:08x}, 0, ", self.poly.xnmodp(n));
                    n -= 64;
                }
                self.src[b].put_str("0, 0, 0, 0);\n");
                self.src[b].put_str("y0 = clmul_lo(x0, k), k = clmul_hi(x0, k);\n");
                self.src[b].put_str("y0 = _mm512_xor_si512(y0, k);\n");
                put!(self.src[vars], "{} z0;\n", self.isa.vec16_type());
                self.src[b].put_str(
                    "z0 = _mm_ternarylogic_epi64(_mm512_castsi512_si128(y0), _mm512_extracti32x4_epi32(y0, 1), _mm512_extracti32x4_epi32(y0, 2), 0x96);\n",
                );
                self.src[b].put_str("z0 = _mm_xor_si128(z0, _mm512_extracti32x4_epi32(x0, 3));\n");
                x0 = "z0";
            }
            self.src[b].put_str("/* Reduce 128 bits to 32 bits, and multiply by x^32. */\n");
            let lane = self.isa.vec16_lane8_fn();
            if scalar_tail != 0 {
                put!(
                    self.src[b],
                    "vc ^= {0}({1}({2}({2}(0, {0}({3}, 0)), {0}({3}, 1)), ",
                    lane,
                    if kernel_itrs != 0 { "clmul_scalar" } else { "crc_shift" },
                    self.scalar8_fn,
                    x0
                );
                if kernel_itrs != 0 {
                    let amount = kernel_itrs * ap.s_load * self.scalar_bytes + scalar_tail;
                    put!(
                        self.src[b],
                        "0x{:08x}",
                        self.poly.xnmodp(u64::from(amount) * 8 - 33)
                    );
                    self.need_clmul_scalar();
                } else {
                    self.need_crc_shift();
                    put!(self.src[b], "klen * {} + {}", ap.s_acc, scalar_tail);
                }
                self.src[b].put_str("), 0);\n");
            } else {
                self.need_crc_scalar(8);
                put!(self.src[b], "crc0 = {}(0, {}({}, 0));\n", self.scalar8_fn, lane, x0);
                put!(
                    self.src[b],
                    "crc0 = {}(crc0, {}{}({}, 1));\n",
                    self.scalar8_fn,
                    if ap.s_load != 0 { "vc ^ " } else { "" },
                    lane,
                    x0
                );
            }
        }
        if scalar_tail != 0 {
            put!(self.src[b], "/* Final {} bytes. */\n", scalar_tail);
            if ap.s_acc > 1 {
                self.src[b].put_str("buf += ");
                self.put_product(b, "klen", ap.s_acc - 1);
                self.src[b].put_str(";\n");
                put!(self.src[b], "crc0 = crc{};\n", ap.s_acc - 1);
            }
            let mut left = scalar_tail;
            while left > self.scalar_bytes {
                self.put_scalar_step_open(b, 0, self.scalar_bytes);
                put!(self.src[b], "buf), buf += {};\n", self.scalar_bytes);
                left -= self.scalar_bytes;
            }
            self.put_scalar_step_open(b, 0, self.scalar_bytes);
            put!(self.src[b], "buf ^ vc), buf += {};\n", self.scalar_bytes);
            if kernel_itrs == 0 && !ap.use_end_ptr {
                put!(self.src[b], "len -= {};\n", scalar_tail);
            }
        } else if ap.v_load != 0 && ap.s_load != 0 {
            put!(self.src[b], "buf = {};\n", vbuf);
        }
        if kernel_itrs != 0 {
            let amount = kernel_itrs * block_size + scalar_tail;
            put!(self.src[b], "len -= {};\n", amount);
            if amount % self.vector_bytes != 0 {
                *current_alignment = self.scalar_bytes;
            }
        } else {
            if ap.use_end_ptr {
                self.src[b].put_str("len = end - buf;\n");
            }
            if block_size % self.vector_bytes != 0 || scalar_tail % self.vector_bytes != 0 {
                *current_alignment = self.scalar_bytes;
            }
        }
        self.src[b].put_str("}\n");
    }
}
