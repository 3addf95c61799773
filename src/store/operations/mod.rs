pub mod abilities;
pub mod bandit;
pub mod calibrations;
pub mod interactions;
pub mod items;
pub mod models;
pub mod outcomes;
pub mod review;
pub mod vocabulary;
