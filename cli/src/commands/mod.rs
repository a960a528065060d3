pub mod health;
pub mod records;
pub mod simulate;
