//! Document processing pipeline as seen from one case session.

pub mod case_processing;
