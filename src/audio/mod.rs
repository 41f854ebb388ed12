pub mod analysis;
pub mod bands;
pub mod decode;
pub mod params;
pub mod stats;
