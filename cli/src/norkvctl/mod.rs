// cli/src/norkvctl/mod.rs — subcommand implementations and the shared
// error type. Exit codes follow the store's stable numeric code set.

pub mod cases;
pub mod image;
pub mod inspect;
pub mod ops;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CtlError {
    #[error("image: {0}")]
    Image(#[from] std::io::Error),
    #[error("store: {0}")]
    Store(#[from] norkv::Error),
    #[error("bad argument: {0}")]
    Arg(String),
    #[error("case {case} failed: {detail}")]
    CaseFailed { case: usize, detail: String },
}

impl CtlError {
    /// Exit code for `main`: the store's stable numeric code where one
    /// exists, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        match self {
            CtlError::Store(e) => e.code() as i32,
            CtlError::Arg(_) => norkv::Error::BadParam.code() as i32,
            CtlError::Image(_) | CtlError::CaseFailed { .. } => 1,
        }
    }
}
