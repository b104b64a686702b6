/*!
 * Reserves
 * Reserve records, the table that owns them, and their creation parameters
 */

mod record;
mod release;
mod spec;
mod table;

pub use record::{Links, Reserve, SignalRegistration};
pub use release::ReleaseGate;
pub use spec::ReserveSpec;
pub use table::ReserveTable;
