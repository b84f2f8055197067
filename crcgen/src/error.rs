//! Errors reported while parsing a generation request or emitting code.

use std::io;

/// An error produced while parsing a generation request or while flushing
/// the generated translation unit.
///
/// Every error is fatal to the generation run; nothing is written to the
/// output until the whole unit has been assembled, so a failed run commits
/// no partial output.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unknown ISA `{0}`")]
    UnknownIsa(String),

    #[error("invalid polynomial `{0}`")]
    InvalidPoly(String),

    #[error("polynomial `{0}` too short")]
    PolyTooShort(String),

    #[error("polynomial `{0}` too long")]
    PolyTooLong(String),

    #[error("expected digit sequence after `{after}` in algorithm `{algo}`")]
    ExpectedDigits { algo: String, after: char },

    #[error("unrecognised character `{ch}` in algorithm `{algo}`")]
    UnrecognisedAlgoChar { algo: String, ch: char },

    #[error(
        "algorithm `{algo}` has {kind} load count ({load}) not an integer \
         multiple of {kind} accumulator count ({acc})"
    )]
    LoadNotMultiple {
        algo: String,
        kind: &'static str,
        load: u32,
        acc: u32,
    },

    #[error("an ISA must be specified to use vector accumulators")]
    VectorsWithoutIsa,

    #[error("an ISA must be specified to use more than one scalar accumulator")]
    MultiScalarWithoutIsa,

    #[error("nesting too deep in generated code")]
    NestingTooDeep,

    #[error("deferred buffer visited twice during flush")]
    MalformedDirective,

    #[error(transparent)]
    Io(#[from] io::Error),
}
