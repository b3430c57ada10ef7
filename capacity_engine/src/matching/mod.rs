//! Name and identifier matching used to join source tables onto sites.

pub mod gsp;
pub mod identifier;
pub mod similarity;
pub mod site_name;

pub use gsp::{best_gsp_match, GspMapping, GspMatch, GspMatchCounts};
pub use identifier::{cascade_match, normalize_identifier, IdentifierTier};
pub use similarity::similarity_ratio;
pub use site_name::{MatchMethod, SiteNameMatch, SiteNameMatcher};
