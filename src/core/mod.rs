// Rules of origin logic. Pure functions over the domain model plus the
// resolver that drives them through the repository ports.

pub mod annotate;
pub mod codes;
pub mod conflicts;
pub mod footnotes;
pub mod hierarchy;
pub mod resolver;
