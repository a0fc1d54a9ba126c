pub mod cdr;
pub mod receipt;
pub mod state;

pub use cdr::{decode_envelope, DecodeError, DecodeMethod, Decoded};
pub use receipt::{parse_receipt, Receipt};
pub use state::DispatchState;
