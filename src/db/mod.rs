//! Database access: pool, migrations and small repositories

mod pool;
pub mod settings;
pub mod users;

pub use pool::*;
