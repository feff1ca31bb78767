pub mod audit;
pub mod catalog;
pub mod config;
pub mod repository;
pub mod semantic;
pub mod store;

#[cfg(test)]
mod tests;
