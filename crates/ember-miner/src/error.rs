use ember_primitives::BlockValidityError;

/// Fatal errors surfaced by template construction.
///
/// Per-package and per-contract rejections are not errors: the selector
/// simply moves on to the next candidate. Only a template that fails the
/// post-assembly validity check is discarded.
#[derive(Debug, thiserror::Error)]
pub enum BlockAssemblerError {
    #[error(transparent)]
    TestBlockValidityFailed(#[from] BlockValidityError),
}
