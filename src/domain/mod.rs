//! Domain module
//!
//! Age bucketing and vital-sign types. No infrastructure dependencies.

mod age_group;
mod vitals;

pub use age_group::{age_in_years, parse_birth_date, AgeGroup, AGE_BOUNDARIES};
pub use vitals::{JoinedReading, Vital};
