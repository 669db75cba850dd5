pub mod background;
pub mod executor;
pub mod linalg;
pub mod random_choice;

pub use background::BackgroundSelector;
pub use executor::Executor;
pub use random_choice::RandomChoice;
