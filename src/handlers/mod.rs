pub mod auth;
pub mod courses;
pub mod health;
pub mod students;

#[cfg(test)]
mod integration_tests;
