use chrono::{NaiveDate, Utc};
use rand::Rng;
use std::sync::Arc;

/// Number of random digits appended after the date stamp
pub const REFERENCE_SUFFIX_DIGITS: usize = 4;

/// Produces a reference for a prefix; swapped out where allocation must be deterministic.
pub type ReferenceGenerator = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// The live generator backed by [`generate`]
pub fn default_generator() -> ReferenceGenerator {
    Arc::new(generate)
}

/// Generates a human-readable order reference: `<prefix><yymmdd><4 digits>`.
///
/// References are expected to be unique within a day of operation, not
/// globally. Callers persisting them must treat a unique-constraint violation
/// as a cue to generate again.
pub fn generate(prefix: &str) -> String {
    generate_with(prefix, Utc::now().date_naive(), &mut rand::thread_rng())
}

/// Deterministic variant of [`generate`] for a fixed date and random source.
pub fn generate_with<R: Rng + ?Sized>(prefix: &str, date: NaiveDate, rng: &mut R) -> String {
    let suffix: u16 = rng.gen_range(0..10_000);
    format!(
        "{}{}{:0width$}",
        prefix,
        date.format("%y%m%d"),
        suffix,
        width = REFERENCE_SUFFIX_DIGITS
    )
}
