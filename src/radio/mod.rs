pub mod driver;
pub mod traits;

pub use driver::{Sx1262Driver, Sx1262Pins};
pub use traits::{
    CadExitMode, CadOutcome, CadParams, Radio, RadioError, RadioEvent, RadioState, RxConfig,
    TxConfig,
};
