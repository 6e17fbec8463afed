pub mod dev;
pub mod prebundle;
