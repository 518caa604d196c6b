//! Script source port.

use crate::domain::converter::NamedScript;
use crate::domain::error::PinecastError;

pub trait ScriptPort {
    /// Every script this source holds, in a stable order.
    fn load_scripts(&self) -> Result<Vec<NamedScript>, PinecastError>;
}
