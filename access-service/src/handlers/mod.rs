pub mod audit;
pub mod context;
pub mod navigation;
