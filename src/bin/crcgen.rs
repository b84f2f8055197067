//! Command-line front end for the `crcgen` library.

use std::fmt::Write as _;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::Parser;

use crcgen::algo::Algorithm;
use crcgen::isa::Isa;
use crcgen::poly::{self, Poly};

fn after_help_text() -> String {
    let self_isa = if cfg!(any(target_arch = "aarch64", target_arch = "arm")) {
        "neon"
    } else {
        "sse"
    };
    format!(
        "Example: crcgen -i {self_isa} -p crc32c -a v8s1_s2

Possible values for ISA are:
  none
  neon (aarch64, tuned for pmull+eor fusion)
  neon_eor3 (aarch64, using pmull and eor3)
  sse, avx, avx2 (x86_64, using pclmulqdq)
  avx512 (x86_64, using pclmulqdq and vpternlogq)
  avx512_vpclmulqdq (x86_64, using vpclmulqdq and vpternlogq)

Possible values for POLY include:
  crc32   (0x04C11DB7) - hardware accelerated on aarch64
  crc32c  (0x1EDC6F41) - hardware accelerated on aarch64 and x86_64
  crc32k  (0x741B8CD7)
  crc32k2 (0x32583499)
  crc32q  (0x814141AB)
  or specify any 32-bit polynomial in hexadecimal form

The ALGO string consists of multiple phases, separated by underscores.
Each phase can contain (with no spaces inbetween) any mixture of:
  vN[xM] use N vector accumulators, and NxM vector loads per iteration
  sN[xM] use N scalar accumulators, and NxM scalar loads per iteration
  kN     use an outer loop over N bytes
  e      use an end pointer for the (inner) loop condition"
    )
}

/// Generate C code for computing CRC32.
#[derive(Parser)]
#[command(name = "crcgen", after_help = after_help_text())]
struct Options {
    /// Instruction set family to target.
    #[arg(short = 'i', long, value_name = "ISA")]
    isa: Option<String>,

    /// CRC polynomial, by name or in hexadecimal form.
    #[arg(short = 'p', long, value_name = "POLY")]
    polynomial: Option<String>,

    /// Algorithm descriptor controlling the shape of the main loops.
    #[arg(short = 'a', long, value_name = "ALGO")]
    algorithm: Option<String>,

    /// Output file; `-` or absent writes to standard output.
    #[arg(short = 'o', long, value_name = "FILE")]
    output: Option<PathBuf>,
}

fn main() {
    env_logger::init();
    let opts = match Options::try_parse() {
        Ok(opts) => opts,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = e.print();
            return;
        }
        Err(e) => {
            let _ = e.print();
            process::exit(1);
        }
    };
    if let Err(e) = run(&opts) {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

fn run(opts: &Options) -> Result<()> {
    let isa = match opts.isa.as_deref() {
        Some(name) if !name.is_empty() => Isa::from_name(name)?,
        _ => Isa::None,
    };
    let poly = match opts.polynomial.as_deref() {
        Some(value) if !value.is_empty() => Poly::parse(value)?,
        _ => poly::CRC32,
    };
    let algo_text = match opts.algorithm.as_deref() {
        Some(value) if !value.is_empty() => value,
        _ => "s1",
    };
    let algo = Algorithm::parse(algo_text, isa)?;
    let invocation = invocation_line(opts);

    match opts.output.as_deref() {
        Some(path) if path.as_os_str() != "-" => {
            let file = File::create(path)
                .with_context(|| format!("could not open {} for writing", path.display()))?;
            let mut w = BufWriter::new(file);
            crcgen::generate(isa, poly, &algo, &invocation, &mut w)?;
            w.flush()?;
        }
        _ => {
            let stdout = io::stdout();
            let mut w = stdout.lock();
            crcgen::generate(isa, poly, &algo, &invocation, &mut w)?;
        }
    }
    Ok(())
}

/// The invocation as recorded in the provenance comment, with the
/// arguments spelled the way the user gave them.
fn invocation_line(opts: &Options) -> String {
    let mut line = String::from("crcgen");
    let args = [
        ("-i", &opts.isa),
        ("-p", &opts.polynomial),
        ("-a", &opts.algorithm),
    ];
    for (flag, value) in args {
        if let Some(value) = value {
            if !value.is_empty() {
                let _ = write!(line, " {flag} {value}");
            }
        }
    }
    line
}
