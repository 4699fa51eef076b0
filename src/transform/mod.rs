pub mod gold;
pub mod silver;
pub mod tabular;

pub use gold::{enrich, enrich_date, EnrichOutcome};
pub use silver::{transform, transform_date, TransformOutcome};
