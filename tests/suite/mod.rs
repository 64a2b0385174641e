//! Integration test modules

mod diagnostics;
mod lifecycle;
mod registration;
mod routing;
