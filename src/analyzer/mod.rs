pub mod opportunity;

pub use opportunity::find_opportunity;
