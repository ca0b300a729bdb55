mod manifest_integrity_profile;

pub use manifest_integrity_profile::*;
