pub mod provenance;
pub mod seed;
