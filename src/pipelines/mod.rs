pub mod adapters;
pub mod dereplicate;
