pub mod rdns;
pub mod whois;

pub use rdns::PtrLookup;
pub use whois::{AsnCache, PrefixInfoClient, RipeStatClient};
