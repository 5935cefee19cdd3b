pub mod scene;
pub mod sort;
