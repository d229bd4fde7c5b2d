// banter-common: shared types and the wire protocol for the Banter workspace

pub mod protocol;
pub mod types;
