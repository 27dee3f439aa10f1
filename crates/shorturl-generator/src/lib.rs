pub mod error;
pub mod random;

pub use error::GeneratorError;
pub use random::RandomGenerator;

use shorturl_core::ShortKey;

/// Trait for generating short keys.
///
/// Implementations are pure generators that don't interact with storage.
/// They are not required to produce unique keys: collisions are detected by
/// the repository and the caller retries with a fresh key.
pub trait Generator: Send + Sync + 'static {
    type Output: Into<ShortKey>;

    /// Produces the next candidate key.
    fn generate(&self) -> Self::Output;
}
