//! Port selection for the server started by test.sh

use std::ops::RangeInclusive;

use rand::Rng;

/// Ports handed to test.sh
pub const PORT_RANGE: RangeInclusive<u16> = 8500..=9999;

/// Pick a port for the project under test, as text for the script's argv.
/// Not checked against ports already in use.
pub fn choose_port() -> String {
    rand::thread_rng().gen_range(PORT_RANGE).to_string()
}
