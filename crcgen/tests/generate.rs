//! End-to-end checks on generated translation units.
//!
//! The fold constants asserted for the NEON-EOR3 kernel are the well-known
//! CRC-32 folding constants (x^159, x^95, x^287, x^223, x^543, x^479 mod P)
//! and anchor the generation-time polynomial arithmetic against
//! independently published values.

use crcgen::algo::Algorithm;
use crcgen::isa::Isa;
use crcgen::poly::Poly;

fn generate(isa: &str, poly: &str, algo: &str) -> String {
    let invocation = format!("crcgen -i {isa} -p {poly} -a {algo}");
    generate_as(isa, poly, algo, &invocation)
}

fn generate_as(isa: &str, poly: &str, algo: &str, invocation: &str) -> String {
    let isa = Isa::from_name(isa).unwrap();
    let poly = Poly::parse(poly).unwrap();
    let algo = Algorithm::parse(algo, isa).unwrap();
    let mut out = Vec::new();
    crcgen::generate(isa, poly, &algo, invocation, &mut out).unwrap();
    String::from_utf8(out).unwrap()
}

#[track_caller]
fn assert_has(output: &str, needle: &str) {
    assert!(
        output.contains(needle),
        "generated output does not contain {needle:?}\n--- output ---\n{output}"
    );
}

#[test]
fn scalar_table_kernel() {
    let out = generate("none", "crc32c", "s1");
    assert_has(&out, "/* Generated by crcgen using: */");
    assert_has(&out, "/* crcgen -i none -p crc32c -a s1 */");
    assert_has(&out, "#include <stddef.h>\n#include <stdint.h>\n");
    // Byte-at-a-time and word-at-a-time table helpers share one table with
    // four planes; plane 0 starts with the canonical CRC-32C entries.
    assert_has(&out, "static const uint32_t g_crc_table[4][256] = {{");
    assert_has(&out, "0x00000000, 0xf26b8303");
    assert_has(
        &out,
        "CRC_AINLINE uint32_t crc_u8(uint32_t crc, uint8_t val) {",
    );
    assert_has(&out, "return (crc >> 8) ^ g_crc_table[0][(crc & 0xFF) ^ val];");
    assert_has(
        &out,
        "CRC_AINLINE uint32_t crc_u32(uint32_t crc, uint32_t val) {",
    );
    assert_has(
        &out,
        "CRC_EXPORT uint32_t crc32_impl(uint32_t crc0, const char* buf, size_t len) {",
    );
    assert_has(&out, "for (; len && ((uintptr_t)buf & 3); --len) {");
    assert_has(&out, "for (; len >= 4; buf += 4, len -= 4) {");
    assert_has(&out, "crc0 = crc_u32(crc0, *(const uint32_t*)buf);");
    assert_has(&out, "crc0 = crc_u8(crc0, *buf++);");
    assert_has(&out, "return ~crc0;");
    // No intrinsic headers for the portable kernel.
    assert!(!out.contains("mmintrin"));
    assert!(!out.contains("arm_"));
}

#[test]
fn sse_kernel_with_outer_loop() {
    let out = generate("sse", "crc32c", "v4s3x3k4096");
    assert_has(&out, "#include <nmmintrin.h>");
    assert_has(&out, "#include <wmmintrin.h>");
    assert_has(&out, "#define clmul_lo(a, b) (_mm_clmulepi64_si128((a), (b), 0))");
    assert_has(&out, "#define clmul_hi(a, b) (_mm_clmulepi64_si128((a), (b), 17))");
    assert_has(&out, "CRC_AINLINE __m128i clmul_scalar(uint32_t a, uint32_t b) {");
    // 4096 rounds down to 30 blocks of 136 bytes.
    assert_has(&out, "while (len >= 4080) {");
    assert_has(&out, "uint32_t kitrs = 29;");
    assert_has(&out, "const size_t blk = 30;");
    assert_has(&out, "const size_t klen = blk * 24;");
    assert_has(&out, "const char* buf2 = buf + klen * 3;");
    assert_has(&out, "__m128i x3 = _mm_loadu_si128((const __m128i*)(buf2 + 48)), y3;");
    assert_has(&out, "do {");
    assert_has(&out, "} while (--kitrs);");
    assert_has(&out, "y0 = clmul_lo(x0, k), x0 = clmul_hi(x0, k);");
    // Three interleaved hardware CRC streams.
    assert_has(&out, "crc1 = _mm_crc32_u64(crc1, *(const uint64_t*)(buf + klen));");
    assert_has(
        &out,
        "crc2 = _mm_crc32_u64(crc2, *(const uint64_t*)(buf + klen * 2 + 8));",
    );
    // Merge constants are compile-time because the kernel size is fixed.
    assert_has(&out, "vc0 = clmul_scalar(crc0, 0x");
    assert_has(
        &out,
        "vc = _mm_extract_epi64(_mm_xor_si128(vc0, _mm_xor_si128(vc1, vc2)), 0);",
    );
    assert_has(&out, "crc0 = _mm_crc32_u64(0, _mm_extract_epi64(x0, 0));");
    assert_has(&out, "crc0 = _mm_crc32_u64(crc0, vc ^ _mm_extract_epi64(x0, 1));");
    assert_has(&out, "buf = buf2;");
    assert_has(&out, "len -= 4080;");
}

#[test]
fn neon_eor3_two_phase_kernel() {
    let out = generate("neon_eor3", "crc32", "v9s3x2e_s3");
    assert_has(&out, "#include <arm_acle.h>");
    assert_has(&out, "#include <arm_neon.h>");
    assert_has(&out, "CRC_AINLINE uint64x2_t clmul_lo(uint64x2_t a, uint64x2_t b) {");
    assert_has(
        &out,
        "__asm(\"pmull %0.1q, %1.1d, %2.1d\\n\" : \"=w\"(r) : \"w\"(a), \"w\"(b));",
    );
    assert_has(
        &out,
        "__asm(\"pmull2 %0.1q, %1.2d, %2.2d\\n\" : \"=w\"(r) : \"w\"(a), \"w\"(b));",
    );
    assert_has(&out, "CRC_AINLINE uint64x2_t crc_shift(uint32_t crc, size_t nbytes) {");
    assert_has(&out, "if (((uintptr_t)buf & 8) && len >= 8) {");
    // Phase one: nine vector accumulators, end-pointer loop.
    assert_has(&out, "if (len >= 192) {");
    assert_has(&out, "size_t blk = (len - 0) / 192;");
    assert_has(&out, "const char* buf2 = buf + klen * 3;");
    assert_has(&out, "const char* limit = buf + klen - 32;");
    assert_has(&out, "k_[] = {0x26b70c3d, 0x3f41287a}");
    assert_has(&out, "while (buf <= limit) {");
    assert_has(
        &out,
        "x8 = veor3q_u64(x8, y8, vld1q_u64((const uint64_t*)(buf2 + 128)));",
    );
    assert_has(&out, "crc2 = __crc32d(crc2, *(const uint64_t*)(buf + klen * 2));");
    // Tree reduction of x0..x8 at spans 1, 2 and 4.
    assert_has(&out, "/* Reduce x0 ... x8 to just x0. */");
    assert_has(&out, "k_[] = {0xae689191, 0xccaa009e}");
    assert_has(&out, "x1 = x2, x2 = x3, x3 = x4, x4 = x5, x5 = x6, x6 = x7, x7 = x8;");
    assert_has(&out, "k_[] = {0xf1da05aa, 0x81256527}");
    assert_has(&out, "k_[] = {0x8f352d95, 0x1d9513d7}");
    assert_has(&out, "vc0 = crc_shift(crc0, klen * 2 + blk * 144);");
    assert_has(&out, "vc2 = crc_shift(crc2, 0 + blk * 144);");
    assert_has(&out, "vc = vgetq_lane_u64(veor3q_u64(vc0, vc1, vc2), 0);");
    assert_has(&out, "crc0 = __crc32d(0, vgetq_lane_u64(x0, 0));");
    assert_has(&out, "crc0 = __crc32d(crc0, vc ^ vgetq_lane_u64(x0, 1));");
    assert_has(&out, "len = end - buf;");
    // Phase two: three scalar streams in a do-while.
    assert_has(&out, "if (len >= 32) {");
    assert_has(&out, "size_t klen = ((len - 8) / 24) * 8;");
    assert_has(&out, "do {");
    assert_has(&out, "} while (len >= 32);");
    assert_has(&out, "vc = vgetq_lane_u64(veorq_u64(vc0, vc1), 0);");
    assert_has(&out, "/* Final 8 bytes. */");
    assert_has(&out, "crc0 = __crc32d(crc0, *(const uint64_t*)buf ^ vc), buf += 8;");
}

#[test]
fn avx512_vpclmulqdq_kernel() {
    let out = generate("avx512_vpclmulqdq", "crc32c", "v3s1k4096e");
    assert_has(&out, "#include <immintrin.h>");
    assert_has(
        &out,
        "#define clmul_lo(a, b) (_mm512_clmulepi64_epi128((a), (b), 0))",
    );
    assert_has(&out, "while (((uintptr_t)buf & 56) && len >= 8) {");
    // 4096 rounds down to 20 blocks of 200 bytes plus a 32-byte tail.
    assert_has(&out, "while (len >= 4032) {");
    assert_has(&out, "const size_t blk = 20;");
    assert_has(&out, "const size_t klen = blk * 8;");
    assert_has(&out, "const char* limit = buf + blk * 192 + klen - 16;");
    assert_has(&out, "__m512i x0 = _mm512_loadu_si512((const void*)buf2), y0;");
    assert_has(&out, "k = _mm512_broadcast_i32x4(_mm_setr_epi32(0x");
    assert_has(
        &out,
        "x0 = _mm512_xor_si512(_mm512_castsi128_si512(_mm_cvtsi32_si128(crc0)), x0);",
    );
    assert_has(&out, "crc0 = 0;");
    assert_has(&out, "} while (buf <= limit);");
    assert_has(
        &out,
        "x2 = _mm512_ternarylogic_epi64(x2, y2, _mm512_loadu_si512((const void*)(buf2 + 128)), 0x96);",
    );
    assert_has(&out, "/* Reduce 512 bits to 128 bits. */");
    assert_has(&out, "k = _mm512_setr_epi32(0x");
    assert_has(&out, "y0 = clmul_lo(x0, k), k = clmul_hi(x0, k);");
    assert_has(&out, "y0 = _mm512_xor_si512(y0, k);");
    assert_has(
        &out,
        "z0 = _mm_ternarylogic_epi64(_mm512_castsi512_si128(y0), _mm512_extracti32x4_epi32(y0, 1), _mm512_extracti32x4_epi32(y0, 2), 0x96);",
    );
    assert_has(&out, "z0 = _mm_xor_si128(z0, _mm512_extracti32x4_epi32(x0, 3));");
    assert_has(&out, "vc = 0;");
    assert_has(
        &out,
        "vc ^= _mm_extract_epi64(clmul_scalar(_mm_crc32_u64(_mm_crc32_u64(0, _mm_extract_epi64(z0, 0)), _mm_extract_epi64(z0, 1)), 0x",
    );
    assert_has(&out, "/* Final 32 bytes. */");
    assert_has(&out, "len -= 4032;");
}

#[test]
fn hex_polynomial_matches_named_form() {
    let named = generate_as("sse", "crc32c", "s1", "same");
    let hex = generate_as("sse", "0x1EDC6F41", "s1", "same");
    assert_eq!(named, hex);
}

#[test]
fn provenance_keeps_the_user_spelling() {
    let out = generate("sse", "0x1EDC6F41", "s1");
    assert_has(&out, "/* crcgen -i sse -p 0x1EDC6F41 -a s1 */");
}

#[test]
fn generation_is_idempotent() {
    let a = generate("neon", "crc32", "v2s3_s1");
    let b = generate("neon", "crc32", "v2s3_s1");
    assert_eq!(a, b);
    let a = generate("none", "crc32k", "s1");
    let b = generate("none", "crc32k", "s1");
    assert_eq!(a, b);
}

#[test]
fn zero_kernel_is_no_outer_kernel() {
    let plain = generate_as("sse", "crc32c", "s3", "same");
    let zeroed = generate_as("sse", "crc32c", "s3k0", "same");
    assert_eq!(plain, zeroed);
}

#[test]
fn table_polynomial_follows_request() {
    // crc32k has no hardware support anywhere, so even the SSE kernel uses
    // Barrett-reduction scalar helpers with generation-time constants.
    let out = generate("sse", "crc32k", "s1");
    assert_has(&out, "static const uint32_t g_crc_table[1][256] = {{");
    assert_has(&out, "CRC_AINLINE uint32_t crc_u64(uint32_t crc, uint64_t val) {");
    assert_has(&out, "__m128i a = _mm_cvtsi64_si128(crc ^ val);");
    assert_has(&out, "__m128i k = _mm_setr_epi32(0x");
    assert_has(&out, "__m128i b = _mm_clmulepi64_si128(a, k, 0x00);");
    assert_has(&out, "__m128i c = _mm_clmulepi64_si128(b, k, 0x10);");
    assert_has(&out, "return _mm_extract_epi32(c, 2);");
    assert!(!out.contains("_mm_crc32_u32"));
}

#[test]
fn emitted_braces_are_reindented() {
    let out = generate("none", "crc32", "s1");
    // Function body at one level, loop bodies at two.
    assert_has(&out, "\n  crc0 = ~crc0;\n");
    assert_has(&out, "  for (; len; --len) {\n    crc0 = crc_u8(crc0, *buf++);\n  }\n");
    // No line ends with trailing whitespace.
    for line in out.lines() {
        assert_eq!(line, line.trim_end(), "trailing whitespace in {line:?}");
    }
}
