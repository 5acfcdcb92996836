//! Command line front end for provisioning working copies of the sample
//! database.
pub mod cli;
