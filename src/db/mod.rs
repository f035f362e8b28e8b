pub mod memory;
pub mod postgres;
pub mod schema;
pub mod store;

use rand::distributions::Alphanumeric;
use rand::Rng;

/// Row ids are opaque strings; the backends generate them client-side so
/// the two implementations behave identically.
pub(crate) fn new_row_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect()
}
