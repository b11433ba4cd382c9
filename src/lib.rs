pub mod batch;
pub mod catalog;
pub mod config;
pub mod dataset;
pub mod domain;
pub mod error;
pub mod fetch;
pub mod naming;
#[cfg(feature = "netcdf")]
pub mod netcdf_reader;
pub mod output;
pub mod references;
pub mod storage;
pub mod workflow;
