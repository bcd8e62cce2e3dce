pub mod probe;
pub mod provision;
pub mod resolver;

pub use probe::{probe_java, JavaVersion};
pub use provision::provision_jre;
pub use resolver::{bundled_java, JavaCandidate, JavaResolver, JavaSource, SystemJava};
