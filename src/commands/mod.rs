pub mod generate_config;
pub mod resume;
pub mod train;

pub use self::generate_config::generate_config;
pub use self::resume::resume;
pub use self::train::train;
