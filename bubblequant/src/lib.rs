pub mod bootstrap;
pub mod bubble;
pub mod piecewise;
pub mod progress;

#[doc(hidden)]
pub mod _internal_test_data;
