mod reclaim;

pub use reclaim::*;
