//! Supported instruction-set families and their fixed parameters.

use std::fmt;

use crate::error::Error;

/// Instruction-set family targeted by the generated kernel.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Isa {
    /// Portable C only; lookup tables, no intrinsics.
    None,
    /// AArch64, tuned for pmull+eor fusion.
    Neon,
    /// AArch64, using pmull and eor3.
    NeonEor3,
    /// x86_64 with pclmulqdq; also the profile behind `avx` and `avx2`.
    Sse,
    /// x86_64 with pclmulqdq and vpternlogq.
    Avx512,
    /// x86_64 with vpclmulqdq and vpternlogq on 512-bit vectors.
    Avx512Vpclmulqdq,
}

impl Isa {
    /// Look up an ISA by its command-line name. `sse`, `avx` and `avx2`
    /// all share the SSE profile.
    pub fn from_name(name: &str) -> Result<Self, Error> {
        match name {
            "none" => Ok(Isa::None),
            "neon" => Ok(Isa::Neon),
            "neon_eor3" => Ok(Isa::NeonEor3),
            "sse" | "avx" | "avx2" => Ok(Isa::Sse),
            "avx512" => Ok(Isa::Avx512),
            "avx512_vpclmulqdq" => Ok(Isa::Avx512Vpclmulqdq),
            _ => Err(Error::UnknownIsa(name.to_string())),
        }
    }

    /// True for the AArch64 profiles.
    pub fn is_neon(self) -> bool {
        matches!(self, Isa::Neon | Isa::NeonEor3)
    }

    /// True when a three-way XOR instruction is available.
    pub fn has_eor3(self) -> bool {
        matches!(self, Isa::NeonEor3 | Isa::Avx512 | Isa::Avx512Vpclmulqdq)
    }

    /// Natural scalar word width in bytes.
    pub fn scalar_bytes(self) -> u32 {
        if self == Isa::None {
            4
        } else {
            8
        }
    }

    /// Vector register width in bytes.
    pub fn vector_bytes(self) -> u32 {
        if self == Isa::Avx512Vpclmulqdq {
            64
        } else {
            16
        }
    }

    /// C spelling of the 128-bit lane type.
    pub fn vec16_type(self) -> &'static str {
        match self {
            Isa::Neon | Isa::NeonEor3 => "uint64x2_t",
            Isa::Sse | Isa::Avx512 | Isa::Avx512Vpclmulqdq => "__m128i",
            Isa::None => unreachable!("no vector type for scalar-only ISA"),
        }
    }

    /// C spelling of the 64-bit lane extraction from a 128-bit value.
    pub fn vec16_lane8_fn(self) -> &'static str {
        match self {
            Isa::Neon | Isa::NeonEor3 => "vgetq_lane_u64",
            Isa::Sse | Isa::Avx512 | Isa::Avx512Vpclmulqdq => "_mm_extract_epi64",
            Isa::None => unreachable!("no lane extraction for scalar-only ISA"),
        }
    }

    /// C spelling of the full vector accumulator type.
    pub fn vector_type(self) -> &'static str {
        if self == Isa::Avx512Vpclmulqdq {
            "__m512i"
        } else {
            self.vec16_type()
        }
    }
}

impl fmt::Display for Isa {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Isa::None => "none",
            Isa::Neon => "neon",
            Isa::NeonEor3 => "neon_eor3",
            Isa::Sse => "sse",
            Isa::Avx512 => "avx512",
            Isa::Avx512Vpclmulqdq => "avx512_vpclmulqdq",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_accepts_aliases() {
        assert_eq!(Isa::from_name("sse").unwrap(), Isa::Sse);
        assert_eq!(Isa::from_name("avx").unwrap(), Isa::Sse);
        assert_eq!(Isa::from_name("avx2").unwrap(), Isa::Sse);
        assert_eq!(Isa::from_name("neon_eor3").unwrap(), Isa::NeonEor3);
        assert!(Isa::from_name("mmx").is_err());
        assert!(Isa::from_name("SSE").is_err());
    }
}
