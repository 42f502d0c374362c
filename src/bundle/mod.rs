// Bundle module
// Serialized decoder artifact and its writer/loader

pub mod writer;

pub use writer::{
    calculate_sha256, BundleError, BundleWriter, ClassifierBundle, Decision, BUNDLE_DIR, BUNDLE_FILE,
};
